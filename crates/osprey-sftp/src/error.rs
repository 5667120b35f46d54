//! Error types for the SFTP transfer layer.

use crate::protocol::StatusCode;
use thiserror::Error;

/// Result type alias for SFTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SFTP transfer errors
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH-level error (transport, encryption)
    #[error("SSH error: {0}")]
    Ssh(String),

    /// SFTP protocol violation or malformed message
    #[error("SFTP protocol error: {0}")]
    Protocol(String),

    /// No credential was accepted by the remote host
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Network or channel failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote server rejected an operation; the message is the server's own
    #[error("{message}")]
    Status { code: u32, message: String },

    /// Operation exceeded its time limit
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// True for the STATUS response that marks end-of-file
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Status { code, .. } if *code == StatusCode::Eof as u32)
    }
}

impl From<russh::Error> for Error {
    fn from(err: russh::Error) -> Self {
        Error::Ssh(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_eof() {
        let eof = Error::Status {
            code: StatusCode::Eof as u32,
            message: "End of file".into(),
        };
        assert!(eof.is_eof());

        let failure = Error::Status {
            code: StatusCode::Failure as u32,
            message: "Failure".into(),
        };
        assert!(!failure.is_eof());
        assert!(!Error::Protocol("x".into()).is_eof());
    }

    #[test]
    fn test_status_message_is_verbatim() {
        let err = Error::Status {
            code: StatusCode::NoSuchFile as u32,
            message: "No such file".into(),
        };
        assert_eq!(err.to_string(), "No such file");
    }
}
