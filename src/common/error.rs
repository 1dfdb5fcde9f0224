//! Error types for coordnode

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Bootstrap Errors ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start embedded coordination node: {0}")]
    LaunchFailed(#[source] Box<Error>),

    #[error("start embedded coordination node timeout {0:?}")]
    StartupTimeout(Duration),

    #[error("start embedded coordination node aborted")]
    StartupAborted,

    // === Client Errors ===
    #[error("invalid address {input:?}: {reason}")]
    AddressParse { input: String, reason: String },

    #[error("operation timeout: {0}")]
    Timeout(String),

    // === Node Errors ===
    #[error("coordination node is stopped")]
    NodeStopped,

    // === I/O and Network Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    // === Config and Codec Errors ===
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::AddressParse {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Is this a retryable error?
    ///
    /// Bootstrap and address errors never are: they need an operator or a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Transport(_) => true,
            Error::Grpc(status) => matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
            _ => false,
        }
    }

    /// Convert to gRPC status for RPC responses
    pub fn to_grpc_status(&self) -> tonic::Status {
        use tonic::Code;
        match self {
            Error::NodeStopped => tonic::Status::new(Code::Unavailable, self.to_string()),
            Error::InvalidConfig(_) | Error::AddressParse { .. } => {
                tonic::Status::new(Code::InvalidArgument, self.to_string())
            }
            Error::Timeout(_) => tonic::Status::new(Code::DeadlineExceeded, self.to_string()),
            Error::Grpc(status) => status.clone(),
            _ => tonic::Status::new(Code::Internal, self.to_string()),
        }
    }
}
