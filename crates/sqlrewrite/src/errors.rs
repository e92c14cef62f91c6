#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Unknown SQL dialect: {0}")]
    UnknownDialect(String),
}

pub type Result<T, E = RewriteError> = std::result::Result<T, E>;
