//! Phase 2: per-dimension market research
//!
//! Each dimension gets its own small query set. Lookups fan out under a
//! semaphore and are merged only once every dimension has answered, so no
//! partial merge is ever visible.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use growth_sdk::{emit_thought, FrameSink};

use super::batch::execute_batch;
use super::profile::Profile;
use super::types::{DegradedReason, Dimension, DimensionResearch, MarketData};
use crate::config::PipelineSettings;
use crate::dialogue::ProfileField;
use crate::providers::SearchProvider;

/// Query templates; `{segmento}`, `{localizacao}` and `{tipo_produto}` are filled from the profile
fn query_templates(dimension: Dimension) -> &'static [&'static str] {
    match dimension {
        Dimension::DigitalPresence => &["{segmento} {localizacao} instagram presença digital pequenos negócios"],
        Dimension::Competitiveness => &[
            "concorrentes {segmento} {tipo_produto} {localizacao}",
            "melhores {segmento} em {localizacao} avaliações",
        ],
        Dimension::ChannelDiversification => &["canais de venda {segmento} {tipo_produto} vender online marketplace whatsapp"],
        Dimension::Pricing => &["preço médio {segmento} {tipo_produto} {localizacao}"],
        Dimension::MarketPotential => &[
            "mercado {segmento} brasil crescimento tendências",
            "demanda {segmento} {localizacao}",
        ],
        Dimension::OperationalMaturity => &["gestão {segmento} pequena empresa processos ferramentas gratuitas"],
    }
}

pub fn build_queries(dimension: Dimension, profile: &Profile) -> Vec<String> {
    query_templates(dimension)
        .iter()
        .map(|template| {
            template
                .replace("{segmento}", &profile.field(ProfileField::Segment))
                .replace("{localizacao}", &profile.field(ProfileField::Location))
                .replace("{tipo_produto}", &profile.field(ProfileField::ProductType))
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Collect sources for every dimension
///
/// Lookup failures and per-lookup timeouts leave that dimension without
/// sources; they never fail the phase.
pub async fn research_market(
    search: Arc<dyn SearchProvider>,
    profile: &Profile,
    settings: &PipelineSettings,
    sink: &dyn FrameSink,
) -> Result<(MarketData, Vec<DegradedReason>)> {
    emit_thought!(
        sink,
        2,
        "Pesquisando o mercado de {} em {} dimensões...",
        profile.segment(),
        Dimension::ALL.len()
    );

    let items: Vec<(Dimension, Vec<String>)> = Dimension::ALL
        .iter()
        .map(|d| (*d, build_queries(*d, profile)))
        .collect();
    let per_dimension = settings.max_sources_per_dimension;
    let budget = settings.search_budget();

    let gathered = execute_batch(2, items, settings.research_concurrency, move |(dimension, queries), ctx| {
        let search = search.clone();
        async move {
            let mut hits = Vec::new();
            for query in &queries {
                match tokio::time::timeout(budget, search.search(query, per_dimension)).await {
                    Ok(Ok(found)) => hits.extend(found),
                    Ok(Err(e)) => tracing::warn!(
                        "search for {} ({}/{}) failed: {:#}",
                        dimension,
                        ctx.item_number,
                        ctx.total_items,
                        e
                    ),
                    Err(_) => tracing::warn!("search for {} exceeded {:?}", dimension, budget),
                }
            }
            Ok(DimensionResearch {
                dimension,
                queries,
                sources: hits,
            })
        }
    })
    .await?;

    let market = merge_research(gathered, settings);
    let degraded = market
        .dimensions
        .iter()
        .filter(|d| d.sources.is_empty())
        .map(|d| DegradedReason::NoSources { dimension: d.dimension })
        .collect::<Vec<_>>();

    emit_thought!(
        sink,
        2,
        "Pesquisa concluída: {} fontes, {} dimensões sem dados",
        market.total_sources(),
        degraded.len()
    );
    Ok((market, degraded))
}

/// Order by dimension, dedupe URLs across the phase and apply both caps
///
/// Sources are taken round-robin by rank so one noisy dimension cannot use
/// up the whole budget.
pub fn merge_research(mut gathered: Vec<DimensionResearch>, settings: &PipelineSettings) -> MarketData {
    gathered.sort_by_key(|d| d.dimension);

    let mut seen: HashSet<String> = HashSet::new();
    let mut merged: Vec<DimensionResearch> = gathered
        .iter()
        .map(|d| DimensionResearch {
            dimension: d.dimension,
            queries: d.queries.clone(),
            sources: Vec::new(),
        })
        .collect();

    let deepest = gathered.iter().map(|d| d.sources.len()).max().unwrap_or(0);
    let mut total = 0;
    'ranks: for rank in 0..deepest {
        for (idx, research) in gathered.iter().enumerate() {
            if total >= settings.max_sources_total {
                break 'ranks;
            }
            let Some(hit) = research.sources.get(rank) else {
                continue;
            };
            let slot = &mut merged[idx].sources;
            if slot.len() >= settings.max_sources_per_dimension || hit.url.is_empty() {
                continue;
            }
            if seen.insert(hit.url.clone()) {
                slot.push(hit.clone());
                total += 1;
            }
        }
    }

    MarketData { dimensions: merged }
}
