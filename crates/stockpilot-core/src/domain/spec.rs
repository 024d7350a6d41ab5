//! Input specs for a submission (subjects, options).
//!
//! Subject metadata stays open-ended (`serde_json::Value`) because each
//! provider and prompt template decides which fields it needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::state::TaskKind;

/// One unit of work inside a task, e.g. one stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable key of the subject within its task (the stock code).
    pub key: String,

    /// Whatever the provider / prompt template needs (name, market, industry, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Subject {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// Per-submission knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Overrides the policy's `max_retries` for this task.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Overrides the configured prompt template for this task.
    #[serde(default)]
    pub prompt_template: Option<String>,
}

/// Everything `Orchestrator::submit` needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: TaskKind,
    pub owner_id: String,
    pub subjects: Vec<Subject>,
    pub provider: String,

    #[serde(default)]
    pub options: SubmitOptions,
}

impl SubmitRequest {
    /// Convenience constructor for the common "analyse one stock" case.
    pub fn single(owner_id: impl Into<String>, provider: impl Into<String>, subject: Subject) -> Self {
        Self {
            kind: TaskKind::Single,
            owner_id: owner_id.into(),
            subjects: vec![subject],
            provider: provider.into(),
            options: SubmitOptions::default(),
        }
    }

    pub fn batch(
        owner_id: impl Into<String>,
        provider: impl Into<String>,
        subjects: Vec<Subject>,
    ) -> Self {
        Self {
            kind: TaskKind::Batch,
            owner_id: owner_id.into(),
            subjects,
            provider: provider.into(),
            options: SubmitOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SubmitOptions) -> Self {
        self.options = options;
        self
    }
}
