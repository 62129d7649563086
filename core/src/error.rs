use std::io;

/// Errors from persisting or restoring a frequency model.
///
/// None of these are fatal to the process: a failed load leaves the model as
/// it was, and a failed save leaves the previous file on disk untouched.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported model version: {0}")]
    UnsupportedVersion(u32),

    #[error("corrupt model data: {0}")]
    Corrupt(String),

    #[error("no model path configured")]
    NoPath,
}

impl From<bincode::Error> for ModelError {
    fn from(e: bincode::Error) -> Self {
        match *e {
            bincode::ErrorKind::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                ModelError::Corrupt(format!("truncated: {err}"))
            }
            bincode::ErrorKind::Io(err) => ModelError::Io(err),
            other => ModelError::Corrupt(other.to_string()),
        }
    }
}
