use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockwiseError {
    /// Buffer, extent or stride mismatch detected while building a view.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),

    /// Operand block grids are incompatible for the requested operation.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The task arena cannot hold the task graph. Fatal for the operation.
    #[error("task queue exhausted: requested {requested} bytes, {available} of {capacity} available")]
    QueueExhausted {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// A diagonal tile met a non-positive pivot during Cholesky.
    #[error("matrix is not positive definite (pivot at column {column})")]
    NotPositiveDefinite { column: usize },

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl BlockwiseError {
    /// Whether the error aborted an in-flight operation, leaving the
    /// destination buffer undefined.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BlockwiseError::QueueExhausted { .. } | BlockwiseError::NotPositiveDefinite { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_errors_are_recoverable() {
        assert!(!BlockwiseError::InvalidLayout("mb = 0".into()).is_fatal());
        assert!(!BlockwiseError::ShapeMismatch("2x2 vs 3x3".into()).is_fatal());
    }

    #[test]
    fn exhaustion_is_fatal() {
        let err = BlockwiseError::QueueExhausted {
            requested: 128,
            available: 64,
            capacity: 1024,
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("requested 128 bytes"));
    }
}
