use thiserror::Error;

use crate::task::PartitionId;

/// Taxonomía de errores del motor. Cada variante expone un código
/// distinto hacia el cliente; `TypeMismatch` nunca se propaga hacia
/// arriba (las funciones degradan a identidad/false y loguean).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("error de transporte: {0}")]
    Transport(String),

    #[error("partición {0} no encontrada")]
    PartitionNotFound(PartitionId),

    #[error("partición {0} perdida: sin réplicas ni lineage para reconstruirla")]
    PartitionLost(PartitionId),

    #[error("función desconocida: {0}")]
    UnknownFunction(String),

    #[error("tipo incompatible: {0}")]
    TypeMismatch(String),

    #[error("error de persistencia: {0}")]
    Persistence(String),

    #[error("configuración inválida: {0}")]
    Config(String),
}

impl EngineError {
    /// Código estable del error, para respuestas al cliente.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Transport(_) => "TransportError",
            EngineError::PartitionNotFound(_) => "PartitionNotFound",
            EngineError::PartitionLost(_) => "PartitionLost",
            EngineError::UnknownFunction(_) => "UnknownFunction",
            EngineError::TypeMismatch(_) => "TypeMismatch",
            EngineError::Persistence(_) => "PersistenceError",
            EngineError::Config(_) => "ConfigError",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cada_variante_tiene_codigo_distinto() {
        let errors = [
            EngineError::Transport("x".into()),
            EngineError::PartitionNotFound(1),
            EngineError::PartitionLost(1),
            EngineError::UnknownFunction("f".into()),
            EngineError::TypeMismatch("v".into()),
            EngineError::Persistence("p".into()),
            EngineError::Config("c".into()),
        ];
        let mut codes: Vec<&str> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
