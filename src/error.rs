//! Workflow error values and the error taxonomy
//!
//! A [`WorkflowError`] is the RFC-7807 shaped value that travels through the
//! try/catch/retry machinery until it is caught or surfaces as a faulted
//! instance. Engine-internal failures (storage, channels) live in the
//! per-module snafu enums instead.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::position::Position;

/// Base URI for the built-in error types.
pub const ERROR_TYPE_BASE: &str = "https://rook.dev/errors";

/// The built-in error taxonomy, URI-typed and status-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Expression,
    Authentication,
    Authorization,
    Timeout,
    Communication,
    Runtime,
}

impl ErrorKind {
    #[must_use]
    pub fn uri(&self) -> String {
        let slug = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Expression => "expression",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Communication => "communication",
            ErrorKind::Runtime => "runtime",
        };
        format!("{ERROR_TYPE_BASE}/{slug}")
    }

    /// Default numeric status, mirroring HTTP semantics.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Configuration | ErrorKind::Validation | ErrorKind::Expression => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::Timeout => 408,
            ErrorKind::Communication | ErrorKind::Runtime => 500,
        }
    }

    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "Configuration Error",
            ErrorKind::Validation => "Validation Error",
            ErrorKind::Expression => "Expression Error",
            ErrorKind::Authentication => "Authentication Error",
            ErrorKind::Authorization => "Authorization Error",
            ErrorKind::Timeout => "Timeout Error",
            ErrorKind::Communication => "Communication Error",
            ErrorKind::Runtime => "Runtime Error",
        }
    }
}

/// RFC-7807 shaped error value raised during workflow execution.
///
/// Immutable once raised; carried up the scope chain until a matching
/// `catch` handles it or the instance faults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowError {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: u16,
    /// Position of the task that raised the error, as a flat pointer string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WorkflowError {
    #[must_use]
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            type_: kind.uri(),
            status: kind.status(),
            instance: None,
            title: kind.title().to_string(),
            detail: Some(detail.into()),
        }
    }

    /// Attach the raising position, unless one was already recorded.
    #[must_use]
    pub fn at(mut self, position: &Position) -> Self {
        if self.instance.is_none() {
            self.instance = Some(position.to_string());
        }
        self
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    #[must_use]
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.type_ == kind.uri()
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): ", self.title, self.status)?;
        match &self.detail {
            Some(detail) => write!(f, "{detail}"),
            None => write!(f, "{}", self.type_),
        }
    }
}
