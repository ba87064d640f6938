use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown entity type: {0}")]
    UnknownType(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("cardinality violation: {0}")]
    CardinalityViolation(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl EngineError {
    pub fn unknown_type<T: Into<String>>(msg: T) -> Self {
        EngineError::UnknownType(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        EngineError::NotFound(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn cardinality<T: Into<String>>(msg: T) -> Self {
        EngineError::CardinalityViolation(msg.into())
    }

    pub fn storage<T: Into<String>>(msg: T) -> Self {
        EngineError::StorageFailure(msg.into())
    }
}
