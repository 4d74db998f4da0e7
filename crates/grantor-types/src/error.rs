//! Problem-style error model shared by the runtime, HTTP surface and CLI.
//!
//! Every failure the workflow engine can surface is a [`Problem`]: a kind,
//! an HTTP-ish status, a short title, a longer detail and the task reference
//! path where it arose (RFC 7807 shape). The runner is the single place that
//! turns a returned `Problem` into try/catch lookup or propagation.

use serde::{Deserialize, Serialize};

/// Classification of a workflow or broker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Validation,
    Configuration,
    Communication,
    Expression,
    Runtime,
    Timeout,
}

impl ErrorKind {
    /// Default HTTP status for this kind.
    pub fn default_status(self) -> u16 {
        match self {
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::Validation => 400,
            ErrorKind::Configuration => 500,
            ErrorKind::Communication => 502,
            ErrorKind::Expression => 400,
            ErrorKind::Runtime => 500,
            ErrorKind::Timeout => 504,
        }
    }

    /// Whether errors of this kind are retryable by default under a retry
    /// policy. Only transient kinds qualify.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Communication | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Communication => "communication",
            ErrorKind::Expression => "expression",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured failure raised by a task, transport or the broker itself.
///
/// `instance` carries the colon-separated task reference path of the task
/// that raised the problem (empty outside workflow execution).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub status: u16,
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub instance: String,
}

impl Problem {
    /// Create a problem with the kind's default status.
    pub fn new(kind: ErrorKind, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            title: title.into(),
            detail: detail.into(),
            instance: String::new(),
        }
    }

    pub fn authentication(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, "Authentication failed", detail)
    }

    pub fn authorization(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, "Not authorized", detail)
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "Validation failed", detail)
    }

    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, "Configuration error", detail)
    }

    pub fn communication(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Communication, "Communication failure", detail)
    }

    pub fn expression(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Expression, "Expression error", detail)
    }

    pub fn runtime(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, "Runtime error", detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, "Timed out", detail)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Attach the task reference path where the problem arose.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Serialize into the payload placed on a faulted workflow's output.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{} [{}]", self.title, self.kind)
        } else {
            write!(f, "{} [{}]: {}", self.title, self.kind, self.detail)
        }
    }
}

impl std::error::Error for Problem {}
