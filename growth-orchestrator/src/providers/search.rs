//! Tavily web search over reqwest

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;

use super::{SearchHit, SearchProvider};

pub struct TavilySearch {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(http: reqwest::Client, api_key: String, endpoint: String) -> Self {
        Self {
            http,
            api_key,
            endpoint,
        }
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let body = json!({
            "query": query,
            "search_depth": "basic",
            "max_results": max_results,
            "include_answer": false,
            "include_raw_content": false
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("tavily request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "tavily returned status {}: {}",
                status,
                crate::text::preview(&body, 200)
            ));
        }

        let payload: Value = response.json().await.context("tavily response is not JSON")?;
        let hits = parse_results(&payload)?;
        tracing::debug!(query, hits = hits.len(), "tavily search complete");
        Ok(hits)
    }
}

/// Turn a Tavily response into hits, skipping rows without a URL and repeats
fn parse_results(payload: &Value) -> Result<Vec<SearchHit>> {
    let rows = payload
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("tavily response is missing the results array"))?;

    let mut seen = HashSet::new();
    let mut hits = Vec::new();
    for row in rows {
        let url = row
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }

        let text = |key: &str| {
            row.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };

        hits.push(SearchHit {
            title: text("title"),
            snippet: text("content"),
            score: row.get("score").and_then(Value::as_f64).unwrap_or(0.0),
            url,
        });
    }
    Ok(hits)
}
