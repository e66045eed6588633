//! Black-box capabilities the orchestrator depends on: web search and
//! structured completion.
//!
//! Both are trait objects so the worker can run against real HTTP providers
//! while tests substitute scripted ones.

pub mod completion;
pub mod search;
pub mod structured;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::Settings;

pub use completion::GroqCompletion;
pub use search::TavilySearch;

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub score: f64,
}

/// `search(query) -> ranked documents`
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// Prompt for a JSON-producing completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// `complete(prompt, schema) -> structured answer`
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value>;
}

/// Run a completion and deserialize the answer into `T`
pub async fn complete_as<T: DeserializeOwned>(
    llm: &dyn CompletionProvider,
    request: &CompletionRequest,
) -> Result<T> {
    let value = llm.complete(request).await?;
    serde_json::from_value(value).context("Completion did not match the expected shape")
}

/// Provider whose credentials are missing; every call fails
#[derive(Debug, Clone)]
pub struct Unconfigured {
    pub what: &'static str,
    pub env_var: &'static str,
}

#[async_trait]
impl SearchProvider for Unconfigured {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
        Err(anyhow!("{} is not configured (set {})", self.what, self.env_var))
    }
}

#[async_trait]
impl CompletionProvider for Unconfigured {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Value> {
        Err(anyhow!("{} is not configured (set {})", self.what, self.env_var))
    }
}

/// The capability bundle handed to every action
#[derive(Clone)]
pub struct Capabilities {
    pub search: Arc<dyn SearchProvider>,
    pub llm: Arc<dyn CompletionProvider>,
}

impl Capabilities {
    pub fn new(search: Arc<dyn SearchProvider>, llm: Arc<dyn CompletionProvider>) -> Self {
        Self { search, llm }
    }

    /// Build HTTP providers from settings, degrading to [`Unconfigured`] without keys
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("growth-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let search: Arc<dyn SearchProvider> = match &settings.search.api_key {
            Some(key) => Arc::new(TavilySearch::new(
                http.clone(),
                key.clone(),
                settings.search.endpoint.clone(),
            )),
            None => Arc::new(Unconfigured {
                what: "web search",
                env_var: "TAVILY_API_KEY",
            }),
        };

        let llm: Arc<dyn CompletionProvider> = match &settings.llm.api_key {
            Some(key) => Arc::new(GroqCompletion::new(http, key.clone(), &settings.llm)),
            None => Arc::new(Unconfigured {
                what: "completion provider",
                env_var: "GROQ_API_KEY",
            }),
        };

        Ok(Self { search, llm })
    }
}
