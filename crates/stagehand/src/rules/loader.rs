// Rule Loader - Reads a rules directory into compiled rules
//
// Files load in file-name order and records in declaration order, so the
// resulting set has a stable evaluation order. A bad file or record is
// reported and skipped; it never prevents the rest from loading.

use std::path::{Path, PathBuf};

use serde_json::Value;
use stagehand_runtime::{CompiledRule, RuleStore};
use stagehand_types::{Rule, rules_from_document};
use tokio::fs;
use tracing::{debug, info, warn};

use super::{RuleLoadError, RuleLoadResult};

/// Outcome of reading a rules directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Compiled rules in evaluation order
    pub rules: Vec<CompiledRule>,
    /// Files that were read
    pub files: Vec<PathBuf>,
    /// Everything that was skipped
    pub errors: Vec<RuleLoadError>,
}

/// Whether `path` names a rule file
///
/// Hidden files and common editor leftovers are ignored.
pub fn is_rule_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with('#') || name.ends_with('~') {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("json" | "toml")
    )
}

/// Parse one file's text into its rule records
pub fn parse_rules(path: &Path, text: &str) -> RuleLoadResult<Vec<Result<Rule, RuleLoadError>>> {
    let parse_error = |reason: String| RuleLoadError::Parse {
        path: path.to_path_buf(),
        reason,
    };

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    let document: Value = if is_toml {
        let table: toml::Table = toml::from_str(text).map_err(|e| parse_error(e.to_string()))?;
        serde_json::to_value(table).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?
    };

    let records = rules_from_document(document).map_err(|e| parse_error(e.to_string()))?;
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            record.map_err(|source| RuleLoadError::Rule {
                path: path.to_path_buf(),
                index,
                source,
            })
        })
        .collect())
}

/// Read and compile every rule file in `dir`
///
/// Fails only when the directory itself cannot be listed.
pub async fn load_dir(dir: &Path) -> RuleLoadResult<LoadReport> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| RuleLoadError::io(dir, e))?;

    let mut paths = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if is_rule_file(&path) {
                    paths.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => return Err(RuleLoadError::io(dir, e)),
        }
    }
    paths.sort();

    let mut report = LoadReport::default();
    for path in paths {
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                report.errors.push(RuleLoadError::io(&path, e));
                continue;
            }
        };

        let records = match parse_rules(&path, &text) {
            Ok(records) => records,
            Err(e) => {
                report.errors.push(e);
                continue;
            }
        };

        let mut loaded = 0;
        for record in records {
            let compiled = record.and_then(|rule| {
                CompiledRule::compile(rule).map_err(|source| RuleLoadError::Compile {
                    path: path.clone(),
                    source,
                })
            });
            match compiled {
                Ok(rule) => {
                    report.rules.push(rule);
                    loaded += 1;
                }
                Err(e) => report.errors.push(e),
            }
        }
        debug!("Loaded {} rule(s) from {}", loaded, path.display());
        report.files.push(path);
    }

    Ok(report)
}

/// Load `dir` and install the result as the active rule set
///
/// Returns the new generation. When the directory cannot be read the active
/// set is left untouched.
pub async fn reload(dir: &Path, store: &RuleStore) -> RuleLoadResult<u64> {
    let report = load_dir(dir).await?;
    for error in &report.errors {
        warn!("{}", error);
    }

    let files = report.files.len();
    let skipped = report.errors.len();
    let generation = store.replace(report.rules);
    info!(
        generation,
        files,
        skipped,
        "Rules loaded from {}",
        dir.display()
    );
    Ok(generation)
}
