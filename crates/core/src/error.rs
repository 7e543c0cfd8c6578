/// Domain-level errors raised by the registry and the template engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Staged buffer not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}
