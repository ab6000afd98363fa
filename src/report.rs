//! Status report for the workflow UI (`product.json`).
//!
//! ```json
//! {"brainlife": [{"type": "success", "msg": "Head position file was written successfully."}]}
//! ```
//!
//! The report is built once from the orchestrator's result; a failed run
//! produces an `error` record carrying the whole error chain.
use std::path::Path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::RunSummary;

/// Message shown for a successful run.
pub const SUCCESS_MSG: &str = "Head position file was written successfully.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Error,
}

/// One `{type, msg}` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub msg:  String,
}

/// Top-level `product.json` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub brainlife: Vec<Message>,
}

impl Product {
    /// Map a run outcome onto the report.
    pub fn from_outcome(outcome: &Result<RunSummary>) -> Self {
        let message = match outcome {
            Ok(_) => Message { kind: MessageKind::Success, msg: SUCCESS_MSG.to_string() },
            Err(e) => Message { kind: MessageKind::Error, msg: format!("{e:#}") },
        };
        Product { brainlife: vec![message] }
    }

    pub fn is_success(&self) -> bool {
        self.brainlife.iter().all(|m| m.kind != MessageKind::Error)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
    }
}
