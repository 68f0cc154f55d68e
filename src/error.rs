use crate::path::BusPath;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a failed bus, wait or shell operation
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidParameter,
    RpcError,
    TimeoutError,
    AuthError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidParameter => "InvalidParameter",
            ErrorKind::RpcError => "RpcError",
            ErrorKind::TimeoutError => "TimeoutError",
            ErrorKind::AuthError => "AuthError",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum BusError {
    #[error("path not found: {0}")]
    NotFound(BusPath),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("rpc failed: {0}")]
    Rpc(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl BusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BusError::NotFound(_) => ErrorKind::NotFound,
            BusError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            BusError::Rpc(_) => ErrorKind::RpcError,
            BusError::Timeout(_) => ErrorKind::TimeoutError,
            BusError::Auth(_) => ErrorKind::AuthError,
        }
    }

    /// Transport failures and readiness timeouts may succeed on a later attempt
    pub fn is_retriable(&self) -> bool {
        matches!(self, BusError::Rpc(_) | BusError::Timeout(_))
    }
}
