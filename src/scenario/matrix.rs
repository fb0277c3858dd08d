//! Parameter matrix expansion
//!
//! Walks the Cartesian product of the matrix's value lists like a set of
//! nested loops: keys in declaration order, values in list order, the last
//! key varying fastest. The iterators are `Clone`, so an expansion can be
//! restarted from any point.

use serde_json::Value;

use super::Matrix;
use crate::context::Vars;
use crate::template::value_text;

/// Matrix combinations alone, without the base context
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    matrix: &'a Matrix,
    /// Odometer position, one index per key; `None` once exhausted
    cursor: Option<Vec<usize>>,
}

pub fn combinations(matrix: &Matrix) -> Combinations<'_> {
    // A key with no values makes the product empty
    let cursor = if matrix.values().any(Vec::is_empty) {
        None
    } else {
        Some(vec![0; matrix.len()])
    };
    Combinations { matrix, cursor }
}

impl Iterator for Combinations<'_> {
    type Item = Vars;

    fn next(&mut self) -> Option<Vars> {
        let cursor = self.cursor.as_mut()?;

        let item: Vars = self
            .matrix
            .iter()
            .zip(cursor.iter())
            .map(|((key, values), &i)| (key.clone(), values[i].clone()))
            .collect();

        // Advance, last key fastest
        let mut exhausted = true;
        for (pos, (_, values)) in self.matrix.iter().enumerate().rev() {
            cursor[pos] += 1;
            if cursor[pos] < values.len() {
                exhausted = false;
                break;
            }
            cursor[pos] = 0;
        }
        if exhausted {
            self.cursor = None;
        }

        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.cursor {
            None => (0, Some(0)),
            Some(cursor) => {
                let mut remaining: usize = 0;
                let mut weight: usize = 1;
                let mut total: usize = 1;
                for ((_, values), &i) in self.matrix.iter().zip(cursor.iter()).rev() {
                    remaining += (values.len() - 1 - i) * weight;
                    weight *= values.len();
                    total *= values.len();
                }
                let left = remaining + 1;
                debug_assert!(left <= total);
                (left, Some(left))
            }
        }
    }
}

impl ExactSizeIterator for Combinations<'_> {}

/// Matrix combinations, each merged over a base context
#[derive(Debug, Clone)]
pub struct MatrixIter<'a> {
    combinations: Combinations<'a>,
    base: &'a Vars,
}

/// Expand `matrix` over `base`; matrix values override same-named base keys
///
/// An empty matrix yields `base` exactly once.
pub fn expand<'a>(matrix: &'a Matrix, base: &'a Vars) -> MatrixIter<'a> {
    MatrixIter {
        combinations: combinations(matrix),
        base,
    }
}

impl Iterator for MatrixIter<'_> {
    type Item = Vars;

    fn next(&mut self) -> Option<Vars> {
        let params = self.combinations.next()?;
        let mut vars = self.base.clone();
        vars.extend(params);
        Some(vars)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.combinations.size_hint()
    }
}

impl ExactSizeIterator for MatrixIter<'_> {}

/// Label of one instance: `name[k=v,...]`, or the bare name without params
pub fn instance_label(name: &str, params: &Vars) -> String {
    if params.is_empty() {
        return name.to_string();
    }
    let parts: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, label_value(v)))
        .collect();
    format!("{}[{}]", name, parts.join(","))
}

fn label_value(value: &Value) -> String {
    value_text(value)
        .map(|t| t.into_owned())
        .unwrap_or_else(|| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matrix(entries: &[(&str, Vec<Value>)]) -> Matrix {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_cartesian_product_order() {
        let m = matrix(&[("a", vec![json!(1), json!(2)]), ("b", vec![json!("x"), json!("y")])]);
        let base = Vars::from([("c".to_string(), json!(0))]);

        let got: Vec<Value> = expand(&m, &base)
            .map(|v| serde_json::to_value(v).unwrap())
            .collect();
        assert_eq!(
            got,
            vec![
                json!({"a": 1, "b": "x", "c": 0}),
                json!({"a": 1, "b": "y", "c": 0}),
                json!({"a": 2, "b": "x", "c": 0}),
                json!({"a": 2, "b": "y", "c": 0}),
            ]
        );
    }

    #[test]
    fn test_empty_matrix_yields_base_once() {
        let base = Vars::from([("c".to_string(), json!(0))]);
        let got: Vec<Vars> = expand(&Matrix::new(), &base).collect();
        assert_eq!(got, vec![base.clone()]);
    }

    #[test]
    fn test_empty_value_list_yields_nothing() {
        let m = matrix(&[("a", vec![json!(1)]), ("b", vec![])]);
        assert_eq!(combinations(&m).count(), 0);
    }

    #[test]
    fn test_matrix_overrides_base() {
        let m = matrix(&[("node", vec![json!("n2")])]);
        let base = Vars::from([("node".to_string(), json!("n1"))]);
        let got: Vec<Vars> = expand(&m, &base).collect();
        assert_eq!(got[0].get("node"), Some(&json!("n2")));
    }

    #[test]
    fn test_restartable_and_sized() {
        let m = matrix(&[("a", vec![json!(1), json!(2), json!(3)]), ("b", vec![json!(true), json!(false)])]);
        let mut iter = combinations(&m);
        assert_eq!(iter.len(), 6);
        iter.next();
        let checkpoint = iter.clone();
        assert_eq!(iter.len(), 5);
        let rest: Vec<Vars> = iter.collect();
        assert_eq!(checkpoint.collect::<Vec<_>>(), rest);
    }

    #[test]
    fn test_instance_label() {
        let params = Vars::from([
            ("db".to_string(), json!("pg15")),
            ("replicas".to_string(), json!(3)),
        ]);
        assert_eq!(instance_label("failover", &params), "failover[db=pg15,replicas=3]");
        assert_eq!(instance_label("smoke", &Vars::new()), "smoke");
    }
}
