use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::retry::RetryPolicy;
use crate::types::ModelId;

pub const CONFIG_FILE: &str = ".stepcheck/config.json";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    OpenAI,
}

impl ProviderKind {
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    fn model_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_MODEL",
            Self::OpenAI => "OPENAI_MODEL",
        }
    }

    pub fn default_model(self) -> ModelId {
        match self {
            Self::Anthropic => ModelId::claude_sonnet(),
            Self::OpenAI => ModelId::gpt_4o(),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAI),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => f.write_str("anthropic"),
            Self::OpenAI => f.write_str("openai"),
        }
    }
}

/// What to do with a step that has text but no resolvable screenshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingScreenshotPolicy {
    /// Mark the step failed; the text cannot be confirmed against ground truth.
    #[default]
    Fail,
    /// Ask the model to review the text without an image.
    TextOnly,
    /// Keep the text as-is and count the step as successful.
    AcceptUnverified,
}

impl FromStr for MissingScreenshotPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "text-only" | "text_only" => Ok(Self::TextOnly),
            "accept-unverified" | "accept_unverified" | "accept" => Ok(Self::AcceptUnverified),
            other => Err(format!("unknown missing-screenshot policy: {other}")),
        }
    }
}

/// Where the filesystem task store looks for inputs and writes outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub input_data_dir: PathBuf,
    pub legacy_json_dir: PathBuf,
    pub legacy_screenshots_dir: PathBuf,
}

impl StorePaths {
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            input_data_dir: root.to_path_buf(),
            legacy_json_dir: root.join("Json"),
            legacy_screenshots_dir: root.join("Screenshots"),
        }
    }
}

impl Default for StorePaths {
    fn default() -> Self {
        Self::rooted_at("Input Data")
    }
}

/// Settings for one validator instance. Built once at startup and passed in
/// explicitly; nothing reads process state after construction.
#[derive(Clone)]
pub struct ValidatorConfig {
    pub provider: ProviderKind,
    pub model: ModelId,
    pub api_key: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub missing_screenshot: MissingScreenshotPolicy,
    /// Truncate neighbour text to this many characters. `None` sends it verbatim.
    pub neighbor_chars: Option<usize>,
    pub retry: RetryPolicy,
    pub trace_dir: Option<PathBuf>,
    /// Directory for the persistent `validation.log`. `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    pub paths: StorePaths,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: ProviderKind::Anthropic.default_model(),
            api_key: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            missing_screenshot: MissingScreenshotPolicy::Fail,
            neighbor_chars: None,
            retry: RetryPolicy::none(),
            trace_dir: None,
            log_dir: None,
            paths: StorePaths::default(),
        }
    }
}

impl fmt::Debug for ValidatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("concurrency", &self.concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .field("missing_screenshot", &self.missing_screenshot)
            .field("neighbor_chars", &self.neighbor_chars)
            .field("retry", &self.retry)
            .field("trace_dir", &self.trace_dir)
            .field("log_dir", &self.log_dir)
            .field("paths", &self.paths)
            .finish()
    }
}

impl ValidatorConfig {
    /// Load `.env`, then `.stepcheck/config.json`, then overlay environment
    /// variables.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let file = ConfigFile::load()?;
        Self::resolve(&file, |key| std::env::var(key).ok())
    }

    /// Precedence: `lookup` (environment) > config file > defaults.
    pub fn resolve(
        file: &ConfigFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match parse_var::<ProviderKind>(&lookup, "PROVIDER")? {
            Some(kind) => kind,
            None => file.provider.unwrap_or_default(),
        };

        let model = lookup("MODEL")
            .or_else(|| lookup(provider.model_var()))
            .or_else(|| file.model.clone())
            .map(ModelId::new)
            .unwrap_or_else(|| provider.default_model());

        let api_key = lookup(provider.api_key_var()).unwrap_or_default();

        let defaults = Self::default();
        let concurrency = parse_var(&lookup, "CONCURRENCY")?
            .or(file.concurrency)
            .unwrap_or(defaults.concurrency)
            .max(1);

        let mut retry = defaults.retry;
        if let Some(attempts) = parse_var::<u32>(&lookup, "RETRY_ATTEMPTS")?.or(file.retry_attempts)
        {
            retry = RetryPolicy::new(attempts);
        }
        if let Some(ms) = file.retry_backoff_ms {
            retry.initial_backoff = Duration::from_millis(ms);
        }

        let mut paths = StorePaths::default();
        if let Some(dir) = lookup("INPUT_DATA_DIR").or_else(|| file.input_data_dir.clone()) {
            paths = StorePaths::rooted_at(dir);
        }
        if let Some(dir) = lookup("INPUT_JSON_DIR").or_else(|| file.legacy_json_dir.clone()) {
            paths.legacy_json_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("SCREENSHOTS_DIR").or_else(|| file.legacy_screenshots_dir.clone())
        {
            paths.legacy_screenshots_dir = PathBuf::from(dir);
        }

        Ok(Self {
            provider,
            model,
            api_key,
            max_tokens: parse_var(&lookup, "MAX_TOKENS")?
                .or(file.max_tokens)
                .unwrap_or(defaults.max_tokens),
            temperature: parse_var(&lookup, "TEMPERATURE")?
                .or(file.temperature)
                .unwrap_or(defaults.temperature),
            concurrency,
            timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECS")?
                .or(file.timeout_secs)
                .unwrap_or(defaults.timeout_secs),
            missing_screenshot: parse_var(&lookup, "MISSING_SCREENSHOT_POLICY")?
                .or(file.missing_screenshot)
                .unwrap_or_default(),
            neighbor_chars: parse_var(&lookup, "NEIGHBOR_CONTEXT_CHARS")?.or(file.neighbor_chars),
            retry,
            trace_dir: lookup("TRACE_DIR")
                .or_else(|| file.trace_dir.clone())
                .map(PathBuf::from),
            log_dir: lookup("OUTPUT_DIR")
                .or_else(|| file.log_dir.clone())
                .map(PathBuf::from),
            paths,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

/// Optional `.stepcheck/config.json`. Every field may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_screenshot: Option<MissingScreenshotPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbor_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_json_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_screenshots_dir: Option<String>,
}

impl ConfigFile {
    /// Load `.stepcheck/config.json` from the working directory, or defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}
