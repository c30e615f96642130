use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("Cannot Read Input: `{0}`")]
    UnreadableFile(String),
    #[error("Unsupported Format: `{0}`")]
    UnsupportedFormat(String),
    #[error("Archive Corrupt: `{0}`")]
    ArchiveCorrupt(String),
    #[error("Malformed XML: `{0}`")]
    MalformedXml(String),
    #[error("Compound File Corrupt: `{0}`")]
    CompoundFileCorrupt(String),
    #[error("Truncated Record Stream: `{0}`")]
    TruncatedStream(String),
    #[error("File-Open Password Required")]
    PasswordRequired,
    #[error("Output Already Exists: `{0}`")]
    OutputExists(PathBuf),
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
}

impl UnlockError {
    /// Process exit code for the CLI layer that wraps this crate.
    pub fn exit_code(&self) -> i32 {
        match self {
            UnlockError::UnreadableFile(_) | UnlockError::IoError(_) => 1,
            UnlockError::UnsupportedFormat(_) => 2,
            UnlockError::OutputExists(_) => 3,
            UnlockError::ArchiveCorrupt(_)
            | UnlockError::MalformedXml(_)
            | UnlockError::CompoundFileCorrupt(_)
            | UnlockError::TruncatedStream(_) => 4,
            UnlockError::PasswordRequired => 5,
        }
    }
}
