//! Outcome model: the result of one provider call.
//!
//! Providers never return `Err`; every transport or protocol problem is folded
//! into `Outcome::Failure` with an `ErrorKind` so that the retry policy can make
//! the same decision for every vendor.

use serde::{Deserialize, Serialize};

use super::errors::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        content: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        tokens_used: Option<u64>,

        /// Model that produced the content, when the provider reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_time_ms: Option<u64>,
    },
    Failure {
        message: String,
        error_kind: ErrorKind,
    },
}

impl Outcome {
    pub fn success(content: impl Into<String>) -> Self {
        Outcome::Success {
            content: content.into(),
            tokens_used: None,
            model: None,
            response_time_ms: None,
        }
    }

    pub fn failure(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
            error_kind,
        }
    }

    pub fn with_tokens(mut self, tokens: Option<u64>) -> Self {
        if let Outcome::Success { tokens_used, .. } = &mut self {
            *tokens_used = tokens;
        }
        self
    }

    pub fn with_model(mut self, name: impl Into<String>) -> Self {
        if let Outcome::Success { model, .. } = &mut self {
            *model = Some(name.into());
        }
        self
    }

    pub fn with_response_time_ms(mut self, millis: u64) -> Self {
        if let Outcome::Success {
            response_time_ms, ..
        } = &mut self
        {
            *response_time_ms = Some(millis);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { error_kind, .. } => Some(*error_kind),
        }
    }
}
