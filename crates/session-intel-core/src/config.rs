//! Environment-driven configuration.
//!
//! Every setting has a default so an empty environment yields a working
//! (collaborator-less) configuration. Only an unusable documents root is fatal.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::IntelError;
use crate::exit_criteria::{ExitCriteria, ZeroGapPolicy};
use crate::trimmer::TrimPolicy;

const DEFAULT_DOCUMENTS_ROOT: &str = "documents";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_CONTEXT_LIMIT: usize = 6;
const DEFAULT_KEEP_LAST_TURNS: usize = 3;
const DEFAULT_RECAP_TURNS: usize = 5;
const DEFAULT_COMPLETION_TOKENS: &str = "done";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in env var {key}: {value}")]
    ParseInt { key: String, value: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("documents root {path} is not writable: {reason}")]
    DocumentsRoot { path: PathBuf, reason: String },
}

impl From<ConfigError> for IntelError {
    fn from(err: ConfigError) -> Self {
        IntelError::Config(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct IntelConfig {
    pub documents_root: PathBuf,
    pub model: String,
    pub api_key: Option<String>,
    pub api_base: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    pub context_limit: usize,
    pub keep_last_n_turns: usize,
    pub recap_user_turns: usize,
    pub zero_gap_policy: ZeroGapPolicy,
    pub completion_tokens: Vec<String>,
    /// SurrealDB URL for session memory; `None` means `<root>/sessions.db`.
    pub memory_url: Option<String>,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            documents_root: PathBuf::from(DEFAULT_DOCUMENTS_ROOT),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_backoff_ms: DEFAULT_RETRY_BASE_BACKOFF_MS,
            context_limit: DEFAULT_CONTEXT_LIMIT,
            keep_last_n_turns: DEFAULT_KEEP_LAST_TURNS,
            recap_user_turns: DEFAULT_RECAP_TURNS,
            zero_gap_policy: ZeroGapPolicy::default(),
            completion_tokens: vec![DEFAULT_COMPLETION_TOKENS.to_string()],
            memory_url: None,
        }
    }
}

impl IntelConfig {
    /// Read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        let api_base = get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
            return Err(ConfigError::InvalidConfiguration(
                "OPENAI_BASE_URL must start with http:// or https://".to_string(),
            ));
        }

        let zero_gap_policy = match get("SESSION_INTEL_ZERO_GAP_POLICY") {
            Some(v) => v.parse().map_err(ConfigError::InvalidConfiguration)?,
            None => ZeroGapPolicy::default(),
        };

        let completion_tokens = get("SESSION_INTEL_COMPLETION_TOKENS")
            .map(|v| {
                v.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|tokens| !tokens.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_COMPLETION_TOKENS.to_string()]);

        let config = Self {
            documents_root: get("SESSION_INTEL_DOCUMENTS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENTS_ROOT)),
            model: get("SESSION_INTEL_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: get("OPENAI_API_KEY"),
            api_base,
            timeout_ms: parse_num(&get, "SESSION_INTEL_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            max_retries: parse_num(&get, "SESSION_INTEL_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_num(
                &get,
                "SESSION_INTEL_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BASE_BACKOFF_MS,
            )?,
            context_limit: parse_num(&get, "SESSION_INTEL_CONTEXT_LIMIT", DEFAULT_CONTEXT_LIMIT)?,
            keep_last_n_turns: parse_num(
                &get,
                "SESSION_INTEL_KEEP_LAST_TURNS",
                DEFAULT_KEEP_LAST_TURNS,
            )?,
            recap_user_turns: parse_num(&get, "SESSION_INTEL_RECAP_TURNS", DEFAULT_RECAP_TURNS)?,
            zero_gap_policy,
            completion_tokens,
            memory_url: get("SESSION_INTEL_MEMORY_URL"),
        };

        config.trim_policy()?;
        Ok(config)
    }

    pub fn trim_policy(&self) -> Result<TrimPolicy, ConfigError> {
        TrimPolicy::new(self.context_limit, self.keep_last_n_turns)
            .map_err(ConfigError::InvalidConfiguration)
    }

    pub fn exit_criteria(&self) -> ExitCriteria {
        ExitCriteria {
            completion_tokens: self.completion_tokens.clone(),
            zero_gap_policy: self.zero_gap_policy,
        }
    }

    /// SurrealDB URL for session memory.
    pub fn memory_url(&self) -> String {
        self.memory_url.clone().unwrap_or_else(|| {
            format!(
                "surrealkv://{}",
                self.documents_root.join("sessions.db").display()
            )
        })
    }

    /// Create the documents root and prove it is writable.
    pub fn ensure_documents_root(&self) -> Result<(), ConfigError> {
        probe_writable(&self.documents_root)
    }
}

fn probe_writable(root: &Path) -> Result<(), ConfigError> {
    let fail = |reason: String| ConfigError::DocumentsRoot {
        path: root.to_path_buf(),
        reason,
    };
    std::fs::create_dir_all(root).map_err(|e| fail(e.to_string()))?;
    let probe = root.join(".write-probe");
    std::fs::write(&probe, b"ok").map_err(|e| fail(e.to_string()))?;
    std::fs::remove_file(&probe).map_err(|e| fail(e.to_string()))?;
    Ok(())
}

fn parse_num<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::ParseInt {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = IntelConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.documents_root, PathBuf::from("documents"));
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.context_limit, 6);
        assert_eq!(config.keep_last_n_turns, 3);
        assert_eq!(config.recap_user_turns, 5);
        assert_eq!(config.completion_tokens, vec!["done".to_string()]);
        assert_eq!(config.zero_gap_policy, ZeroGapPolicy::StayInLearn);
        assert!(config.api_key.is_none());
        assert_eq!(config.memory_url(), "surrealkv://documents/sessions.db");
    }

    #[test]
    fn overrides_are_applied() {
        let config = IntelConfig::from_lookup(lookup(&[
            ("SESSION_INTEL_DOCUMENTS_ROOT", "/tmp/docs"),
            ("SESSION_INTEL_COMPLETION_TOKENS", "Done, finished ,"),
            ("SESSION_INTEL_ZERO_GAP_POLICY", "exit"),
            ("SESSION_INTEL_CONTEXT_LIMIT", "10"),
            ("OPENAI_API_KEY", "  sk-test  "),
        ]))
        .unwrap();
        assert_eq!(config.documents_root, PathBuf::from("/tmp/docs"));
        assert_eq!(config.completion_tokens, vec!["done", "finished"]);
        assert_eq!(config.zero_gap_policy, ZeroGapPolicy::ExitLearn);
        assert_eq!(config.context_limit, 10);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = IntelConfig::from_lookup(lookup(&[("SESSION_INTEL_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseInt { .. }));
    }

    #[test]
    fn keep_larger_than_limit_is_rejected() {
        let err = IntelConfig::from_lookup(lookup(&[
            ("SESSION_INTEL_CONTEXT_LIMIT", "2"),
            ("SESSION_INTEL_KEEP_LAST_TURNS", "4"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfiguration(_)));
    }

    #[test]
    fn documents_root_probe_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = IntelConfig {
            documents_root: dir.path().join("nested/docs"),
            ..IntelConfig::default()
        };
        config.ensure_documents_root().unwrap();
        assert!(config.documents_root.is_dir());
        assert!(!config.documents_root.join(".write-probe").exists());
    }

    #[test]
    fn documents_root_that_is_a_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let config = IntelConfig {
            documents_root: file,
            ..IntelConfig::default()
        };
        let err = config.ensure_documents_root().unwrap_err();
        assert!(matches!(err, ConfigError::DocumentsRoot { .. }));
        let intel: IntelError = err.into();
        assert!(matches!(intel, IntelError::Config(_)));
    }
}
