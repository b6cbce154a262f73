use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::query_fingerprint;

/// Default cap on postings requested from a single source.
pub const DEFAULT_MAX_RESULTS: u32 = 50;

/// Default page size when the caller does not paginate explicitly.
pub const DEFAULT_PAGE_SIZE: u32 = 25;

/// Normalized search parameters, as carried inside fanout messages.
///
/// Construction normalizes free-text terms (trimmed, lowercased, empties
/// dropped) so every downstream consumer sees one canonical form and the
/// fingerprint stays stable across cosmetic input differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    pub experience_level: Option<String>,
    pub remote_type: Option<String>,
    pub max_results: u32,
    pub page: u32,
    pub page_size: u32,
    /// Materialized as `(page - 1) * page_size`, floored at zero, so
    /// consumers never re-derive pagination arithmetic.
    pub start_offset: u32,
    pub skills: Vec<String>,
}

impl SearchQuery {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: normalize_terms(keywords),
            location: None,
            experience_level: None,
            remote_type: None,
            max_results: DEFAULT_MAX_RESULTS,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            start_offset: 0,
            skills: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let location = location.into().trim().to_string();
        self.location = (!location.is_empty()).then_some(location);
        self
    }

    pub fn with_experience_level(mut self, level: impl Into<String>) -> Self {
        self.experience_level = Some(level.into());
        self
    }

    pub fn with_remote_type(mut self, remote_type: impl Into<String>) -> Self {
        self.remote_type = Some(remote_type.into());
        self
    }

    pub fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills = normalize_terms(skills);
        self
    }

    /// Set pagination and keep `start_offset` consistent with it.
    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self.start_offset = page.saturating_sub(1).saturating_mul(page_size);
        self
    }

    /// Stable identity of this query for downstream caching and dedup.
    pub fn fingerprint(&self) -> String {
        let mut extra = BTreeMap::new();
        if let Some(level) = &self.experience_level {
            extra.insert("experience_level".to_string(), level.clone());
        }
        if let Some(remote_type) = &self.remote_type {
            extra.insert("remote_type".to_string(), remote_type.clone());
        }
        if !self.skills.is_empty() {
            extra.insert("skills".to_string(), self.skills.join(","));
        }
        extra.insert("max_results".to_string(), self.max_results.to_string());
        extra.insert("page".to_string(), self.page.to_string());
        extra.insert("page_size".to_string(), self.page_size.to_string());
        query_fingerprint(&self.keywords, self.location.as_deref(), &extra)
    }
}

/// One unit of fanout work: a query to run against an ordered set of sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutMessage {
    pub sources: Vec<String>,
    pub query: SearchQuery,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Incremental-refresh watermark; `None` requests a full refresh.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

impl FanoutMessage {
    /// Build a message for `query` against `sources`, deduplicated with the
    /// first occurrence winning so attempt order is preserved.
    pub fn new(sources: Vec<String>, query: SearchQuery) -> Self {
        let mut seen = HashSet::new();
        let mut deduped = Vec::with_capacity(sources.len());
        for source in sources {
            if seen.insert(source.clone()) {
                deduped.push(source);
            }
        }
        Self {
            sources: deduped,
            query,
            user_id: None,
            since: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn is_full_refresh(&self) -> bool {
        self.since.is_none()
    }
}

/// A single job posting as returned by a source connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub source: String,
    pub title: String,
    pub company: String,
    pub location: Option<String>,
    pub url: String,
    pub posted_at: Option<DateTime<Utc>>,
}

fn normalize_terms(terms: Vec<String>) -> Vec<String> {
    terms
        .into_iter()
        .map(|term| term.trim().to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}
