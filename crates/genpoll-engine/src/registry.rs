use std::collections::BTreeMap;
use std::sync::Arc;

use genpoll_contracts::{GenError, GenerationKind, ModelCatalog, ProviderId};

use crate::provider::{GenerationProvider, PollingProvider};
use crate::vendors::{DryrunApi, GoogleApi, KieApi, ReplicateApi, WaveSpeedApi};

pub type AdapterHandle = Arc<dyn GenerationProvider>;

/// Model catalog plus one adapter instance per provider id.
#[derive(Default)]
pub struct ProviderRegistry {
    catalog: ModelCatalog,
    providers: BTreeMap<ProviderId, AdapterHandle>,
}

impl ProviderRegistry {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog,
            providers: BTreeMap::new(),
        }
    }

    pub fn register<P: GenerationProvider + 'static>(&mut self, provider: P) {
        self.register_shared(Arc::new(provider));
    }

    pub fn register_shared(&mut self, provider: AdapterHandle) {
        self.providers.insert(provider.id().clone(), provider);
    }

    pub fn get(&self, name: &str) -> Option<AdapterHandle> {
        self.providers
            .iter()
            .find(|(id, _)| id.as_str() == name)
            .map(|(_, provider)| Arc::clone(provider))
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().map(ProviderId::to_string).collect()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Resolves a model (and optional provider override) to an adapter.
    ///
    /// Pure lookup: the same inputs give the same adapter instance for the
    /// lifetime of the registry.
    pub fn resolve(
        &self,
        kind: GenerationKind,
        model: &str,
        provider_override: Option<&str>,
    ) -> Result<(ProviderId, AdapterHandle), GenError> {
        let provider_id = self.catalog.resolve(kind, model, provider_override)?;
        let adapter = self
            .providers
            .get(&provider_id)
            .cloned()
            .ok_or_else(|| GenError::UnregisteredProvider(provider_id.clone()))?;
        Ok((provider_id, adapter))
    }
}

/// Registry with every built-in adapter, configured from the environment.
pub fn default_provider_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new(ModelCatalog::default());
    registry.register(PollingProvider::new(DryrunApi::new()));
    registry.register(PollingProvider::new(GoogleApi::new()));
    registry.register(PollingProvider::new(KieApi::new()));
    registry.register(PollingProvider::new(ReplicateApi::new()));
    registry.register(PollingProvider::new(WaveSpeedApi::new()));
    registry
}
