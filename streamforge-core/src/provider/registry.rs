//! Provider registry
//!
//! Keyed mapping from provider id to (info, client). Reads dominate; writes
//! only happen on discovery events, so a single RwLock over the whole map is
//! enough.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{GrpcTranscodeProvider, ProviderError, TranscodeProvider};
use crate::models::{ProviderInfo, TranscodeRequest};

struct RegisteredProvider {
    info: ProviderInfo,
    provider: Arc<dyn TranscodeProvider>,
}

/// Thread-safe registry of transcoding providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, RegisteredProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Duplicate ids are rejected so selection stays
    /// deterministic.
    pub async fn add(&self, provider: Arc<dyn TranscodeProvider>) -> Result<(), ProviderError> {
        let provider_info = provider.info();
        let mut providers = self.providers.write().await;
        if providers.contains_key(&provider_info.id) {
            return Err(ProviderError::InvalidConfig(format!(
                "provider id {} already registered",
                provider_info.id
            )));
        }
        info!(provider = %provider_info.id, priority = provider_info.priority, "provider registered");
        providers.insert(
            provider_info.id.clone(),
            RegisteredProvider {
                info: provider_info,
                provider,
            },
        );
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.providers.write().await.remove(id).is_some();
        if removed {
            info!(provider = %id, "provider removed");
        }
        removed
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn TranscodeProvider>> {
        self.providers
            .read()
            .await
            .get(id)
            .map(|r| Arc::clone(&r.provider))
    }

    pub async fn list(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> = self
            .providers
            .read()
            .await
            .values()
            .map(|r| r.info.clone())
            .collect();
        infos.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        infos
    }

    pub async fn count(&self) -> usize {
        self.providers.read().await.len()
    }

    /// Providers whose advertised capabilities cover the request, ordered by
    /// (priority desc, id asc). The ordering is total, so identical queries
    /// always yield the identical candidate sequence.
    pub async fn select_for(&self, req: &TranscodeRequest) -> Vec<Arc<dyn TranscodeProvider>> {
        let providers = self.providers.read().await;
        let mut candidates: Vec<(&RegisteredProvider, &str)> = providers
            .values()
            .filter(|r| r.info.covers(req))
            .map(|r| (r, r.info.id.as_str()))
            .collect();
        candidates.sort_by(|(a, a_id), (b, b_id)| {
            b.info.priority.cmp(&a.info.priority).then(a_id.cmp(b_id))
        });
        candidates
            .into_iter()
            .map(|(r, _)| Arc::clone(&r.provider))
            .collect()
    }

    /// Replace the registry contents by discovering the given worker
    /// endpoints. Endpoints that fail discovery are skipped with a warning;
    /// a partially successful refresh is still a refresh.
    pub async fn refresh_from_endpoints(&self, endpoints: &[String]) -> usize {
        let mut discovered: Vec<RegisteredProvider> = Vec::new();

        for endpoint in endpoints {
            match GrpcTranscodeProvider::discover(endpoint).await {
                Ok(provider) => {
                    let provider_info = provider.info();
                    discovered.push(RegisteredProvider {
                        info: provider_info,
                        provider: Arc::new(provider),
                    });
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "provider discovery failed");
                }
            }
        }

        let mut providers = self.providers.write().await;
        providers.clear();
        for registered in discovered {
            // Last writer wins on duplicate ids across endpoints; the warn
            // makes misconfigured fleets visible.
            if providers.contains_key(&registered.info.id) {
                warn!(provider = %registered.info.id, "duplicate provider id during refresh");
                continue;
            }
            info!(provider = %registered.info.id, "provider discovered");
            providers.insert(registered.info.id.clone(), registered);
        }
        providers.len()
    }
}
