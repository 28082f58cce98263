use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fila genérica del motor: clave y valor dinámicos.
/// Usamos JSON para poder representar texto, CSV, números, etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: Value,
    pub value: Value,
}

impl Row {
    pub fn new(key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Fila "cero": resultado de reducir una entrada vacía.
    pub fn empty() -> Self {
        Self {
            key: Value::Null,
            value: Value::Null,
        }
    }

    /// Forma canónica de la clave como string.
    /// Los strings van tal cual; el resto se serializa a JSON compacto.
    pub fn key_string(&self) -> String {
        canonical_string(&self.key)
    }

    /// Forma canónica del valor como string.
    pub fn value_string(&self) -> String {
        canonical_string(&self.value)
    }

    /// Coerción numérica del valor: números directos o strings parseables.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
}

/// Forma canónica de un Value como string (para hashear y agrupar por clave).
pub fn canonical_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convierte un f64 a Value, usando entero cuando no hay parte fraccionaria.
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
