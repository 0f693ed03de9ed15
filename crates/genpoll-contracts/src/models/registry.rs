use indexmap::{IndexMap, IndexSet};

use crate::error::GenError;
use crate::task::{GenerationKind, ProviderId};

/// Routing entry for one logical model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    name: String,
    default_provider: ProviderId,
    providers: IndexSet<ProviderId>,
}

impl ModelEntry {
    /// The default provider is always a member of `providers`, listed first.
    pub fn new(name: &str, default_provider: &str, alternatives: &[&str]) -> Self {
        let mut providers = IndexSet::new();
        providers.insert(ProviderId::new(default_provider));
        for provider in alternatives {
            providers.insert(ProviderId::new(*provider));
        }
        Self {
            name: name.to_string(),
            default_provider: ProviderId::new(default_provider),
            providers,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn default_provider(&self) -> &ProviderId {
        &self.default_provider
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.providers.iter()
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.providers.iter().any(|item| item.as_str() == provider)
    }

    fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|item| item.to_string()).collect()
    }
}

/// Static catalog of image and video models. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    image: IndexMap<String, ModelEntry>,
    video: IndexMap<String, ModelEntry>,
}

impl ModelCatalog {
    pub fn new(entries: Option<Vec<(GenerationKind, ModelEntry)>>) -> Self {
        let Some(entries) = entries else {
            return default_catalog();
        };
        let mut catalog = Self {
            image: IndexMap::new(),
            video: IndexMap::new(),
        };
        for (kind, entry) in entries {
            catalog
                .section_mut(kind)
                .insert(entry.name().to_string(), entry);
        }
        catalog
    }

    pub fn get(&self, kind: GenerationKind, model: &str) -> Option<&ModelEntry> {
        self.section(kind).get(model)
    }

    pub fn models(&self, kind: GenerationKind) -> impl Iterator<Item = &ModelEntry> {
        self.section(kind).values()
    }

    pub fn model_names(&self, kind: GenerationKind) -> Vec<String> {
        self.section(kind).keys().cloned().collect()
    }

    /// Picks the provider for `model`, honoring `provider_override` when given.
    pub fn resolve(
        &self,
        kind: GenerationKind,
        model: &str,
        provider_override: Option<&str>,
    ) -> Result<ProviderId, GenError> {
        let Some(entry) = self.get(kind, model) else {
            return Err(GenError::UnknownModel {
                kind,
                model: model.to_string(),
                available: self.model_names(kind),
            });
        };
        let Some(requested) = provider_override.filter(|value| !value.is_empty()) else {
            return Ok(entry.default_provider().clone());
        };
        if !entry.supports(requested) {
            return Err(GenError::ProviderUnavailable {
                provider: requested.to_string(),
                model: model.to_string(),
                available: entry.provider_names(),
            });
        }
        Ok(ProviderId::new(requested))
    }

    pub fn default_model(kind: GenerationKind) -> &'static str {
        match kind {
            GenerationKind::Image => "nano-banana-pro",
            GenerationKind::Video => "veo-3.1",
        }
    }

    fn section(&self, kind: GenerationKind) -> &IndexMap<String, ModelEntry> {
        match kind {
            GenerationKind::Image => &self.image,
            GenerationKind::Video => &self.video,
        }
    }

    fn section_mut(&mut self, kind: GenerationKind) -> &mut IndexMap<String, ModelEntry> {
        match kind {
            GenerationKind::Image => &mut self.image,
            GenerationKind::Video => &mut self.video,
        }
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        default_catalog()
    }
}

fn default_catalog() -> ModelCatalog {
    let mut entries = Vec::new();

    let mut insert = |kind: GenerationKind, name: &str, default: &str, alternatives: &[&str]| {
        entries.push((kind, ModelEntry::new(name, default, alternatives)));
    };

    insert(GenerationKind::Image, "nano-banana", "google", &["kie"]);
    insert(GenerationKind::Image, "nano-banana-pro", "google", &["kie"]);
    insert(GenerationKind::Image, "gpt-image-1.5", "wavespeed", &[]);
    insert(GenerationKind::Image, "flux-schnell", "replicate", &[]);
    insert(GenerationKind::Image, "flux-dev", "replicate", &[]);
    insert(GenerationKind::Image, "dryrun-image-1", "dryrun", &[]);

    insert(GenerationKind::Video, "kling-3.0", "wavespeed", &["kie"]);
    insert(GenerationKind::Video, "sora-2", "wavespeed", &[]);
    insert(GenerationKind::Video, "sora-2-pro", "wavespeed", &["kie"]);
    insert(GenerationKind::Video, "veo-3.1", "google", &[]);
    insert(GenerationKind::Video, "ltx-video", "replicate", &[]);
    insert(GenerationKind::Video, "wan-2.1", "replicate", &[]);
    insert(GenerationKind::Video, "cogvideox", "replicate", &[]);
    insert(GenerationKind::Video, "minimax-video", "replicate", &[]);
    insert(GenerationKind::Video, "dryrun-video-1", "dryrun", &[]);

    ModelCatalog::new(Some(entries))
}
