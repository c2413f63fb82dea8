//! Request, result and handle types shared by the pool and the executor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A request to run `code` written in `language`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub code: String,
}

impl ExecuteRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

/// Outcome of a program that ran to completion inside a sandbox.
///
/// A non-zero exit status is still a completed run: `succeeded` is false but
/// the captured output is returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Interleaved stdout and stderr of the program.
    pub output: String,
    pub exit_code: Option<i32>,
    pub succeeded: bool,
}

impl ExecuteResult {
    #[must_use]
    pub fn from_exit(output: String, exit_code: Option<i32>) -> Self {
        Self {
            output,
            exit_code,
            succeeded: exit_code == Some(0),
        }
    }
}

/// One running sandbox instance bound to a language.
///
/// Handles are deliberately not `Clone`: at any instant a handle lives either
/// in its pool's idle set or with exactly one in-flight execution.
#[derive(Debug, PartialEq, Eq)]
pub struct SandboxHandle {
    id: String,
    language: String,
}

impl SandboxHandle {
    pub(crate) fn new(id: String, language: String) -> Self {
        Self { id, language }
    }

    /// Opaque runtime identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Shortened id for log lines.
    #[must_use]
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

impl fmt::Display for SandboxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.language, self.short_id())
    }
}

/// Container ids are 64 hex chars; the first 12 are what `docker ps` shows.
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
