//! Section registry: section id -> renderer factory.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::error::{ResilienceError, Result};
use crate::section::{SectionId, TierTable};

/// Produces one unit of section work per call.
pub type Renderer = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct SectionRegistry {
    renderers: BTreeMap<SectionId, Renderer>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `render` under `id`, replacing any previous factory.
    pub fn register<F, Fut>(&mut self, id: impl Into<SectionId>, render: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let id = id.into();
        debug!(section = %id, "section registered");
        let renderer: Renderer = Arc::new(move || render().boxed());
        self.renderers.insert(id, renderer);
        self
    }

    pub fn get(&self, id: &SectionId) -> Option<Renderer> {
        self.renderers.get(id).cloned()
    }

    pub fn contains(&self, id: &SectionId) -> bool {
        self.renderers.contains_key(id)
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &SectionId> {
        self.renderers.keys()
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }

    /// Every registered section must have an explicit tier.
    pub fn validate(&self, tiers: &TierTable) -> Result<()> {
        let missing: Vec<&str> = self
            .ids()
            .filter(|id| !tiers.contains(id))
            .map(SectionId::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ResilienceError::Configuration(format!(
                "sections without a complexity tier: {}",
                missing.join(", ")
            )))
        }
    }
}
