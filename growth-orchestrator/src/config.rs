//! Layered settings: built-in defaults, an optional YAML file, then environment.
//!
//! The YAML file is `$GROWTH_CONFIG` when set, otherwise
//! `~/.growth-orchestrator/config.yaml`. A missing file is not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// All worker and client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database location
    pub database_path: PathBuf,
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub pipeline: PipelineSettings,
    /// Lifetime of a login session
    pub session_ttl_days: i64,
}

/// Completion provider (OpenAI-compatible endpoint)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Tried in order; the next one is used on rate limits or retired models
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_results: usize,
}

/// Budgets and caps for the analysis pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub profile_timeout_secs: u64,
    pub research_timeout_secs: u64,
    /// Budget for one dimension lookup inside the research phase
    pub search_timeout_secs: u64,
    pub scoring_timeout_secs: u64,
    pub tasks_timeout_secs: u64,
    pub plan_timeout_secs: u64,
    pub max_sources_total: usize,
    pub max_sources_per_dimension: usize,
    pub research_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            llm: LlmSettings::default(),
            search: SearchSettings::default(),
            pipeline: PipelineSettings::default(),
            session_ttl_days: 30,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            models: vec![
                "llama-3.3-70b-versatile".to_string(),
                "llama-3.1-8b-instant".to_string(),
            ],
            temperature: 0.3,
            max_tokens: 4096,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: "https://api.tavily.com/search".to_string(),
            max_results: 5,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            profile_timeout_secs: 45,
            research_timeout_secs: 75,
            search_timeout_secs: 20,
            scoring_timeout_secs: 50,
            tasks_timeout_secs: 50,
            plan_timeout_secs: 40,
            max_sources_total: 24,
            max_sources_per_dimension: 5,
            research_concurrency: 3,
        }
    }
}

impl PipelineSettings {
    pub fn profile_budget(&self) -> Duration {
        Duration::from_secs(self.profile_timeout_secs)
    }

    pub fn research_budget(&self) -> Duration {
        Duration::from_secs(self.research_timeout_secs)
    }

    pub fn search_budget(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn scoring_budget(&self) -> Duration {
        Duration::from_secs(self.scoring_timeout_secs)
    }

    pub fn tasks_budget(&self) -> Duration {
        Duration::from_secs(self.tasks_timeout_secs)
    }

    pub fn plan_budget(&self) -> Duration {
        Duration::from_secs(self.plan_timeout_secs)
    }
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".growth-orchestrator")
        .join("growth.db")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".growth-orchestrator").join("config.yaml"))
}

impl Settings {
    /// Load settings from the config file and the process environment
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let path = std::env::var_os("GROWTH_CONFIG")
            .map(PathBuf::from)
            .or_else(default_config_path);

        let mut settings = match path {
            Some(path) if path.is_file() => Self::from_yaml_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_yaml(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlay environment variables; `lookup` is `std::env::var` outside tests
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("GROQ_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty("GROQ_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(models) = non_empty("GROQ_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !models.is_empty() {
                self.llm.models = models;
            }
        }
        if let Some(key) = non_empty("TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(path) = non_empty("GROWTH_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
    }
}
