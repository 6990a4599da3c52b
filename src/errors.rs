use std::path::PathBuf;

use thiserror::Error;

use crate::providers::Usage;
use crate::types::{StepKey, TaskId};

/// Failures at the provider boundary: transport, auth, rate limits and
/// responses that are not shaped like the provider's API.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// HTTP status carried by the error, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    /// Transient failures worth another attempt: timeouts, connection
    /// failures, 408, 429, 5xx and Anthropic's 529 overload.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) if err.is_timeout() || err.is_connect() => true,
            _ => matches!(self.status(), Some(408 | 429 | 500..=599)),
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Malformed model response: no JSON object with updated_observation and updated_thought found")]
    Malformed { raw: String, usage: Usage },
}

impl GatewayError {
    /// Tokens billed for the failed call, if the provider reported any.
    pub fn usage(&self) -> Usage {
        match self {
            Self::Malformed { usage, .. } => *usage,
            Self::Provider(_) => Usage::default(),
        }
    }
}

/// Errors confined to one step. They end up in that step's report entry and
/// never abort the run.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("Screenshot missing for {step}: {detail}")]
    MissingScreenshot { step: StepKey, detail: String },

    #[error(
        "Cannot generate content for {step}: screenshot is missing and observation/thought are empty"
    )]
    NothingToProcess { step: StepKey },

    #[error("Model returned blank text for {step}")]
    EmptyRevision { step: StepKey, usage: Usage },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl StepError {
    pub fn usage(&self) -> Usage {
        match self {
            Self::Gateway(err) => err.usage(),
            Self::EmptyRevision { usage, .. } => *usage,
            _ => Usage::default(),
        }
    }
}

/// Errors that abort a whole task run.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task {task_id} not found. Tried: {}", format_paths(.tried))]
    NotFound { task_id: TaskId, tried: Vec<PathBuf> },

    #[error("Invalid task file {}: {source}", .path.display())]
    InvalidTask {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Glob pattern error: {0}")]
    GlobPattern(#[from] glob::PatternError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Config file error: {0}")]
    File(#[from] anyhow::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
