//! Action registry
//!
//! Built once per run from definition files and then shared read-only
//! between every scenario instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_yaml::Value as YamlValue;

use super::{Action, LocalProcessAction};
use crate::common::{Error, Result};

/// Prefix of the synthetic names given to inline hook commands
pub const INLINE_PREFIX: &str = "inline#";

#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: IndexMap<String, Arc<Action>>,
    inline_count: usize,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action. Names are unique across the whole registry.
    pub fn insert(&mut self, action: Action) -> Result<()> {
        let name = action.name().to_string();
        if name.is_empty() {
            return Err(Error::Registry("action with an empty name".to_string()));
        }
        if let Action::Chaos(chaos) = &action {
            chaos.validate()?;
        }
        if self.actions.contains_key(&name) {
            return Err(Error::Registry(format!(
                "action '{}' is defined more than once",
                name
            )));
        }
        self.actions.insert(name, Arc::new(action));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Action>> {
        self.actions.get(name)
    }

    /// Look up `name`, failing with the list of known actions
    pub fn resolve(&self, name: &str) -> Result<Arc<Action>> {
        self.actions.get(name).cloned().ok_or_else(|| {
            let available: Vec<&str> = self
                .names()
                .filter(|n| !n.starts_with(INLINE_PREFIX))
                .collect();
            Error::Registry(format!(
                "unknown action '{}'. Available: {}",
                name,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            ))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Action>> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register an anonymous shell command written inline in a hook list
    /// and return its synthetic name
    pub fn register_inline_shell(&mut self, cmd: &str) -> Result<String> {
        if let Some(existing) = self.actions.iter().find_map(|(name, action)| match &**action {
            Action::Local(a) if name.starts_with(INLINE_PREFIX) && a.cmd == cmd => {
                Some(name.clone())
            }
            _ => None,
        }) {
            return Ok(existing);
        }

        self.inline_count += 1;
        let name = format!("{}{}", INLINE_PREFIX, self.inline_count);
        self.insert(Action::Local(LocalProcessAction::new(name.clone(), cmd)))?;
        Ok(name)
    }

    /// Parse a YAML list of action records; records without `type` are
    /// shell actions
    pub fn load_str(&mut self, content: &str, origin: &Path) -> Result<usize> {
        let records: Vec<YamlValue> = match serde_yaml::from_str::<Option<Vec<YamlValue>>>(content)
        {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => return Err(Error::yaml(origin, e)),
        };

        let count = records.len();
        for (index, mut record) in records.into_iter().enumerate() {
            let YamlValue::Mapping(map) = &mut record else {
                return Err(Error::yaml(
                    origin,
                    format!("entry {} is not a mapping", index + 1),
                ));
            };
            let type_key = YamlValue::from("type");
            if !map.contains_key(&type_key) {
                map.insert(type_key, YamlValue::from("shell"));
            }

            let action: Action = serde_yaml::from_value(record)
                .map_err(|e| Error::yaml(origin, format!("entry {}: {}", index + 1, e)))?;
            tracing::debug!(action = action.name(), kind = action.kind(), file = %origin.display(), "registered action");
            self.insert(action)?;
        }
        Ok(count)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        self.load_str(&content, path)
    }

    /// Load every `.yaml`/`.yml` file of `dir`, in file-name order
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut total = 0;
        for path in definition_files(dir)? {
            total += self.load_file(&path)?;
        }
        tracing::info!(dir = %dir.display(), actions = total, "loaded actions");
        Ok(total)
    }

    /// Load from a file or a directory
    pub fn load_path(&mut self, path: &Path) -> Result<usize> {
        if path.is_dir() {
            self.load_dir(path)
        } else {
            self.load_file(path)
        }
    }
}

/// YAML files directly inside `dir`, sorted by name
pub fn definition_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::FileRead {
        path: dir.display().to_string(),
        error: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: &str = r#"
- name: list_files
  cmd: "ls {{dir}}"
- name: kill_primary
  type: chaos
  inject: "pkill -f {{service}}"
  recover: "systemctl start {{service}}"
- name: status
  type: mock
  stdout: "ok"
"#;

    #[test]
    fn test_missing_type_defaults_to_shell() {
        let mut registry = ActionRegistry::new();
        assert_eq!(registry.load_str(ACTIONS, Path::new("a.yaml")).unwrap(), 3);
        assert_eq!(registry.resolve("list_files").unwrap().kind(), "shell");
        assert!(registry.resolve("kill_primary").unwrap().is_chaos());
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["list_files", "kill_primary", "status"]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ActionRegistry::new();
        registry.load_str(ACTIONS, Path::new("a.yaml")).unwrap();
        let err = registry
            .load_str("- {name: status, type: mock}", Path::new("b.yaml"))
            .unwrap_err();
        assert!(matches!(err, Error::Registry(msg) if msg.contains("status")));
    }

    #[test]
    fn test_unknown_ref_lists_available() {
        let mut registry = ActionRegistry::new();
        registry.load_str(ACTIONS, Path::new("a.yaml")).unwrap();
        registry.register_inline_shell("echo hi").unwrap();
        let err = registry.resolve("nope").unwrap_err().to_string();
        assert!(err.contains("nope"));
        assert!(err.contains("list_files, kill_primary, status"));
        assert!(!err.contains(INLINE_PREFIX));
    }

    #[test]
    fn test_inline_shell_is_deduplicated() {
        let mut registry = ActionRegistry::new();
        let a = registry.register_inline_shell("echo hi").unwrap();
        let b = registry.register_inline_shell("echo hi").unwrap();
        let c = registry.register_inline_shell("echo bye").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_bad_entry_names_file() {
        let mut registry = ActionRegistry::new();
        let err = registry
            .load_str("- {name: x, type: sql}", Path::new("db.yaml"))
            .unwrap_err();
        assert!(matches!(&err, Error::Yaml { path, .. } if path == "db.yaml"));
    }

    #[test]
    fn test_load_dir_reads_yaml_only_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yml"), "- {name: second, cmd: 'true'}").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "- {name: first, cmd: 'true'}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut registry = ActionRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["first", "second"]);
    }
}
