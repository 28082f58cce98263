use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tipos de transformación que viajan en el pipeline de una tarea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformOp {
    Map,
    Filter,
    FlatMap,
    Reduce,
    ReduceByKey,
    Shuffle,
    Join,
}

/// Descriptor serializable de una transformación.
/// Nunca viajan closures: `func_name` referencia el registro de funciones,
/// que tiene que estar poblado igual en driver y workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    pub op: TransformOp,
    pub func_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

impl Transformation {
    pub fn new(op: TransformOp, func_name: impl Into<String>) -> Self {
        Self {
            op,
            func_name: func_name.into(),
            args: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transformation_serializa_y_deserializa() {
        let t = Transformation::new(TransformOp::Map, "ToUpper");
        let json = serde_json::to_string(&t).unwrap();
        let back: Transformation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(json.contains("MAP"));
    }

    #[test]
    fn args_opcionales_no_aparecen_si_faltan() {
        let t = Transformation::new(TransformOp::Filter, "IsLong");
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("args"));
    }
}
