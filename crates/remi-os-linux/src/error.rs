/// Error types for Linux process operations.
#[derive(thiserror::Error, Debug)]
pub enum LinuxError {
    /// The memory statistics file could not be parsed.
    #[error("Malformed statm contents: {0:?}")]
    MalformedStatm(String),

    /// A memory map line could not be parsed.
    #[error("Malformed memory map line: {0:?}")]
    MalformedMap(String),
}

impl From<LinuxError> for remi_core::RemiError {
    fn from(value: LinuxError) -> Self {
        remi_core::RemiError::Os(value.into())
    }
}
