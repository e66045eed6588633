//! Task expansion, scoped chats and content assists
//!
//! Everything here reads the analysis and profile but never changes them;
//! the only writes are task details and the two transcript tables.

pub mod assist;
pub mod chat;
pub mod expand;

use serde_json::Value;

use crate::pipeline::{merge_profile_sources, Profile, ProfileSources};
use crate::providers::{SearchHit, SearchProvider};

pub use assist::{generate_assist, AssistOutput};
pub use chat::{dimension_chat, task_chat, TaskChatRequest};
pub use expand::{expand_task, ExpandRequest, Expansion, RequiredTool, Subtask, TaskDetail};

/// Merge a profile payload in either accepted shape; malformed input is empty
pub fn profile_from_value(value: &Value) -> Profile {
    match ProfileSources::from_payload(value) {
        Ok(sources) => merge_profile_sources(&sources),
        Err(e) => {
            tracing::debug!("ignoring unusable profile payload: {}", e);
            Profile::default()
        }
    }
}

/// One optional lookup; a failed search just means no sources
pub(crate) async fn optional_search(
    search: &dyn SearchProvider,
    query: &str,
    max_results: usize,
) -> Vec<SearchHit> {
    match search.search(query, max_results).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!("search for {:?} failed, continuing without sources: {:#}", query, e);
            Vec::new()
        }
    }
}

/// Render hits as numbered prompt context
pub(crate) fn render_sources(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "(nenhuma fonte disponível)".to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("[{}] {} ({})\n{}", i + 1, hit.title, hit.url, hit.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn source_urls(hits: &[SearchHit]) -> Vec<String> {
    hits.iter().map(|hit| hit.url.clone()).collect()
}
