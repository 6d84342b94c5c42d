//! Rule Files
//!
//! Loading of rule definition files into the [`RuleStore`] and the watcher
//! that keeps the store in sync with the directory.
//!
//! [`RuleStore`]: stagehand_runtime::RuleStore

mod loader;
mod watcher;

pub use loader::*;
pub use watcher::*;

use std::path::PathBuf;

use stagehand_runtime::CompileError;
use stagehand_types::RuleError;

/// Errors raised while reading rule files
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuleLoadError {
    #[error("Cannot read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid rule in {path} (record {index}): {source}")]
    Rule {
        path: PathBuf,
        index: usize,
        #[source]
        source: RuleError,
    },

    #[error("Cannot compile rule in {path}: {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: CompileError,
    },

    #[error("Rule watcher error: {0}")]
    Watch(String),
}

impl RuleLoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, e: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            reason: e.to_string(),
        }
    }
}

/// Result type for rule loading
pub type RuleLoadResult<T> = Result<T, RuleLoadError>;
