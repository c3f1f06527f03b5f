//! Read-only access to the external content a round asks about.

use std::{collections::BTreeMap, sync::Arc};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// One answerable option of a round, with the live signal used for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContentOption {
    /// Identifier players rank or estimate.
    pub id: String,
    /// Human-readable text.
    pub label: String,
    /// Current price of the option; higher ranks first.
    pub signal: f64,
}

/// Failure to obtain round content.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The source knows nothing about this slug.
    #[error("no content for `{0}`")]
    UnknownSlug(String),
    /// The source could not answer.
    #[error("content source unavailable: {0}")]
    Unavailable(String),
}

/// Source of round options keyed by event slug.
pub trait ContentSource: Send + Sync {
    /// Options for `slug`, in source order.
    fn options(&self, slug: &str) -> BoxFuture<'static, Result<Vec<ContentOption>, ContentError>>;
    /// Every slug a new game may draw its rounds from.
    fn slugs(&self) -> BoxFuture<'static, Result<Vec<String>, ContentError>>;
}

/// Content catalog loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticContentSource {
    catalog: Arc<BTreeMap<String, Vec<ContentOption>>>,
}

impl StaticContentSource {
    /// Serve `catalog` as is.
    pub fn new(catalog: BTreeMap<String, Vec<ContentOption>>) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

impl ContentSource for StaticContentSource {
    fn options(&self, slug: &str) -> BoxFuture<'static, Result<Vec<ContentOption>, ContentError>> {
        let result = self
            .catalog
            .get(slug)
            .cloned()
            .ok_or_else(|| ContentError::UnknownSlug(slug.to_string()));
        Box::pin(async move { result })
    }

    fn slugs(&self) -> BoxFuture<'static, Result<Vec<String>, ContentError>> {
        let slugs = self.catalog.keys().cloned().collect();
        Box::pin(async move { Ok(slugs) })
    }
}
