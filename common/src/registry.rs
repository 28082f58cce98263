use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::row::{number_value, Row};

/// Función pura sobre filas, referenciable por nombre desde un pipeline.
#[derive(Clone, Copy)]
pub enum RowFunction {
    Map(fn(&Row) -> Row),
    Filter(fn(&Row) -> bool),
    FlatMap(fn(&Row) -> Vec<Row>),
    Reduce(fn(&Row, &Row) -> Row),
}

/// Registro de funciones a nivel de proceso. Driver y workers tienen
/// que registrar las mismas funciones con el mismo nombre; los pipelines
/// solo transportan nombres, nunca closures.
pub struct FunctionRegistry {
    funcs: HashMap<String, RowFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// Registro con las funciones integradas del motor.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ToUpper", RowFunction::Map(to_upper));
        registry.register("IsLong", RowFunction::Filter(is_long));
        registry.register("SplitWords", RowFunction::FlatMap(split_words));
        registry.register("Max", RowFunction::Reduce(max));
        registry.register("Sum", RowFunction::Reduce(sum));
        registry.register("Concat", RowFunction::Reduce(concat));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, func: RowFunction) {
        self.funcs.insert(name.into(), func);
    }

    pub fn get(&self, name: &str) -> Option<RowFunction> {
        self.funcs.get(name).copied()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/* =========================
   Funciones integradas
   =========================

   Las filas llevan valores dinámicos, así que cada función chequea el
   tipo en runtime. Un tipo inesperado degrada a identidad/false con un
   warn; nunca tumba la tarea. */

fn to_upper(row: &Row) -> Row {
    match &row.value {
        Value::String(s) => Row {
            key: row.key.clone(),
            value: Value::String(s.to_uppercase()),
        },
        other => {
            warn!("ToUpper sobre valor no-string ({other}), se deja tal cual");
            row.clone()
        }
    }
}

fn is_long(row: &Row) -> bool {
    match &row.value {
        Value::String(s) => s.len() > 3,
        other => {
            warn!("IsLong sobre valor no-string ({other}), se descarta la fila");
            false
        }
    }
}

fn split_words(row: &Row) -> Vec<Row> {
    match &row.value {
        Value::String(s) => s
            .split_whitespace()
            .map(|word| Row {
                key: row.key.clone(),
                value: Value::String(word.to_string()),
            })
            .collect(),
        other => {
            warn!("SplitWords sobre valor no-string ({other}), se deja tal cual");
            vec![row.clone()]
        }
    }
}

fn max(a: &Row, b: &Row) -> Row {
    match (a.numeric_value(), b.numeric_value()) {
        (Some(x), Some(y)) => Row {
            key: Value::Null,
            value: number_value(if x >= y { x } else { y }),
        },
        (Some(x), None) => {
            warn!("Max: valor no numérico ({}), se ignora", b.value_string());
            Row {
                key: Value::Null,
                value: number_value(x),
            }
        }
        (None, Some(y)) => {
            warn!("Max: valor no numérico ({}), se ignora", a.value_string());
            Row {
                key: Value::Null,
                value: number_value(y),
            }
        }
        (None, None) => Row::empty(),
    }
}

fn sum(a: &Row, b: &Row) -> Row {
    let x = a.numeric_value().unwrap_or(0.0);
    let y = b.numeric_value().unwrap_or(0.0);
    Row {
        key: Value::Null,
        value: number_value(x + y),
    }
}

fn concat(a: &Row, b: &Row) -> Row {
    Row {
        key: a.key.clone(),
        value: Value::String(format!("{}{}", a.value_string(), b.value_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_builtins_registra_las_funciones_del_motor() {
        let registry = FunctionRegistry::with_builtins();
        for name in ["ToUpper", "IsLong", "SplitWords", "Max", "Sum", "Concat"] {
            assert!(registry.get(name).is_some(), "falta {name}");
        }
        assert!(registry.get("NoExiste").is_none());
    }

    #[test]
    fn to_upper_pasa_a_mayusculas() {
        let out = to_upper(&Row::new(0, "hola"));
        assert_eq!(out.value, json!("HOLA"));
    }

    #[test]
    fn to_upper_deja_valores_no_string_tal_cual() {
        let row = Row::new(0, 42);
        assert_eq!(to_upper(&row), row);
    }

    #[test]
    fn is_long_filtra_por_largo_mayor_a_tres() {
        assert!(!is_long(&Row::new(0, "ab")));
        assert!(!is_long(&Row::new(0, "abc")));
        assert!(is_long(&Row::new(0, "cdef")));
        // no-string: false, no revienta
        assert!(!is_long(&Row::new(0, 1234)));
    }

    #[test]
    fn split_words_expande_en_una_fila_por_palabra() {
        let out = split_words(&Row::new(3, "hola  mundo"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value, json!("hola"));
        assert_eq!(out[1].value, json!("mundo"));
        assert_eq!(out[0].key, json!(3));
    }

    #[test]
    fn max_compara_numericamente_strings_y_numeros() {
        let out = max(&Row::new(0, "7"), &Row::new(1, 9));
        assert_eq!(out.value, json!(9));

        let out = max(&Row::new(0, "9"), &Row::new(1, "4"));
        assert_eq!(out.value, json!(9));
    }

    #[test]
    fn max_ignora_valores_no_numericos() {
        let out = max(&Row::new(0, "7"), &Row::new(1, "abc"));
        assert_eq!(out.value, json!(7));
        assert_eq!(max(&Row::empty(), &Row::empty()), Row::empty());
    }

    #[test]
    fn sum_acumula_valores() {
        let out = sum(&Row::new(0, "2"), &Row::new(1, 3));
        assert_eq!(out.value, json!(5));
    }

    #[test]
    fn concat_une_los_valores_como_string() {
        let out = concat(&Row::new(0, "ab"), &Row::new(1, "cd"));
        assert_eq!(out.value, json!("abcd"));
    }
}
