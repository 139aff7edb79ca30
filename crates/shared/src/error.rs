use std::fmt;

use thiserror::Error;

use crate::domain::{UserField, UserId};

/// The remote call a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get(UserId),
    Create,
    Update(UserId),
    Delete(UserId),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::List => f.write_str("Failed to fetch users"),
            Operation::Get(id) => write!(f, "Failed to fetch user with id {id}"),
            Operation::Create => f.write_str("Failed to create user"),
            Operation::Update(id) => write!(f, "Failed to update user with id {id}"),
            Operation::Delete(id) => write!(f, "Failed to delete user with id {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{operation}: network failure: {message}")]
    Network { operation: Operation, message: String },
    #[error("{operation}: server responded with status {status}")]
    Remote { operation: Operation, status: u16 },
    #[error("{operation}: malformed response body: {message}")]
    Decode { operation: Operation, message: String },
}

impl ClientError {
    pub fn operation(&self) -> Operation {
        match self {
            ClientError::Network { operation, .. }
            | ClientError::Remote { operation, .. }
            | ClientError::Decode { operation, .. } => *operation,
        }
    }

    /// HTTP status for failures the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client-side field check failure. Never leaves the form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationFailure {
    pub field: UserField,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(field: UserField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}
