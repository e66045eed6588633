//! Heuristic field inference from a user message
//!
//! Only fills fields that are still empty, so it never contradicts anything the
//! extraction step or the user already set.

use regex::Regex;
use std::sync::OnceLock;

use super::fields::{FieldContent, FieldMap, ProfileField, Provenance};
use crate::text::fold;

struct Patterns {
    instagram: Regex,
    email: Regex,
    url: Regex,
    phone: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let build = || -> Result<Patterns, regex::Error> {
                Ok(Patterns {
                    instagram: Regex::new(r"(?:^|\s)@([A-Za-z0-9_.]{3,30})")?,
                    email: Regex::new(r"[\w.+-]+@[\w-]+\.[\w.]+")?,
                    url: Regex::new(r"(?:https?://|www\.)[^\s,;]+")?,
                    phone: Regex::new(r"\(?\b\d{2}\)?\s?9\d{4}[-\s]?\d{4}\b")?,
                })
            };
            build()
                .map_err(|e| tracing::error!("invalid inference pattern: {}", e))
                .ok()
        })
        .as_ref()
}

const SOCIAL_DOMAINS: &[&str] = &[
    "instagram.com",
    "facebook.com",
    "tiktok.com",
    "linkedin.com",
    "wa.me",
    "whatsapp.com",
    "youtube.com",
];

const CHANNEL_KEYWORDS: &[(&str, &str)] = &[
    ("instagram", "Instagram"),
    ("whatsapp", "WhatsApp"),
    ("ifood", "iFood"),
    ("loja fisica", "Loja física"),
    ("mercado livre", "Mercado Livre"),
    ("shopee", "Shopee"),
    ("feira", "Feiras"),
    ("so local", "Loja física"),
];

/// Values that can be read straight off `message`
pub fn infer_fields(message: &str, current: &FieldMap) -> Vec<(ProfileField, FieldContent)> {
    let mut found = Vec::new();
    let empty = |field: ProfileField| !current.is_filled(field);
    let folded = fold(message);

    if let Some(p) = patterns() {
        if empty(ProfileField::InstagramHandle) {
            if let Some(handle) = p.instagram.captures(message).and_then(|c| c.get(1)) {
                found.push((
                    ProfileField::InstagramHandle,
                    FieldContent::text(format!("@{}", handle.as_str())),
                ));
            }
        }
        if empty(ProfileField::ContactEmail) {
            if let Some(email) = p.email.find(message) {
                found.push((ProfileField::ContactEmail, FieldContent::text(email.as_str())));
            }
        }
        if empty(ProfileField::SiteUrl) {
            let site = p
                .url
                .find_iter(message)
                .map(|m| m.as_str().trim_end_matches(['.', ')']))
                .find(|url| !SOCIAL_DOMAINS.iter().any(|d| url.contains(d)));
            if let Some(site) = site {
                found.push((ProfileField::SiteUrl, FieldContent::text(site)));
            }
        }
        if empty(ProfileField::WhatsappNumber) {
            if let Some(phone) = p.phone.find(message) {
                found.push((ProfileField::WhatsappNumber, FieldContent::text(phone.as_str())));
            }
        }
    }

    if empty(ProfileField::Employees)
        && (folded.contains("sozinho") || folded.contains("sozinha") || folded.contains("so eu"))
    {
        found.push((ProfileField::Employees, FieldContent::text("1")));
    }

    if empty(ProfileField::OperatingModel) {
        let model = if folded.contains("sob encomenda") {
            Some("sob_encomenda")
        } else if folded.contains("dropship") {
            Some("dropshipping")
        } else if folded.contains("pronta entrega") || folded.contains("estoque proprio") {
            Some("estoque_proprio")
        } else {
            None
        };
        if let Some(model) = model {
            found.push((ProfileField::OperatingModel, FieldContent::text(model)));
        }
    }

    if empty(ProfileField::SalesChannels) {
        let mut channels: Vec<String> = Vec::new();
        for (keyword, channel) in CHANNEL_KEYWORDS {
            if folded.contains(keyword) && !channels.iter().any(|c| c == channel) {
                channels.push(channel.to_string());
            }
        }
        if !channels.is_empty() {
            found.push((ProfileField::SalesChannels, FieldContent::List(channels)));
        }
    }

    found
}

/// Apply inferred values as user-stated
pub fn apply_inferred(message: &str, map: &mut FieldMap) -> Vec<ProfileField> {
    infer_fields(message, map)
        .into_iter()
        .filter_map(|(field, content)| map.set(field, content, Provenance::UserStated).then_some(field))
        .collect()
}

/// Repair values that landed in the wrong field
///
/// - a `segmento` that is only B2B/B2C/D2C/MISTO belongs in `modelo`
/// - `investimento_marketing` and `capital_disponivel` mirror each other
pub fn normalize(map: &mut FieldMap) {
    let segment = map.text(ProfileField::Segment).trim().to_uppercase();
    if matches!(segment.as_str(), "B2B" | "B2C" | "D2C" | "MISTO") {
        if let Some((content, provenance)) = map.take(ProfileField::Segment) {
            if !map.is_filled(ProfileField::Model) {
                map.set(ProfileField::Model, content, provenance);
            }
        }
    }

    let budget = map.get(ProfileField::MarketingBudget).cloned();
    let capital = map.get(ProfileField::AvailableCapital).cloned();
    match (budget, capital) {
        (Some(budget), None) => {
            let provenance = map
                .provenance(ProfileField::MarketingBudget)
                .unwrap_or(Provenance::UserStated);
            map.set(ProfileField::AvailableCapital, budget, provenance);
        }
        (None, Some(capital)) => {
            let provenance = map
                .provenance(ProfileField::AvailableCapital)
                .unwrap_or(Provenance::UserStated);
            map.set(ProfileField::MarketingBudget, capital, provenance);
        }
        _ => {}
    }
}
