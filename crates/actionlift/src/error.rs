use std::{borrow::Cow, fmt};

use crate::loc::CodeLoc;

/// Error raised when action analysis fails.
///
/// There is deliberately a single error kind: every sandbox violation and
/// every structural failure (the assembled source not parsing, for instance)
/// surfaces as an `ActionError` with a human-readable message. Callers in
/// notebook or browser hosts display the message; nothing is recoverable
/// locally, so finer-grained variants would buy nothing.
#[derive(Debug, Clone)]
pub struct ActionError {
    message: Cow<'static, str>,
    location: Option<CodeLoc>,
}

impl ActionError {
    /// A sandbox violation tied to a position in the assembled source.
    pub(crate) fn violation_at(message: impl Into<Cow<'static, str>>, location: CodeLoc) -> Self {
        Self {
            message: message.into(),
            location: Some(location),
        }
    }

    /// A sandbox violation with no single source position (whole-tree rules).
    pub(crate) fn violation(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// A parse or traversal failure of the assembled source.
    pub(crate) fn structural(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// The human-readable description of the broken rule.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Position of the violation in the assembled source, when known.
    #[must_use]
    pub fn location(&self) -> Option<CodeLoc> {
        self.location
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "action validation error: {}", self.message)?;
        if let Some(location) = self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ActionError {}
