pub mod query;
pub mod synthetic;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::{ArtifactCache, content_key};
use crate::config::{CacheConfig, VisualConfig};
use crate::error::is_hard_provider_failure;
use crate::run_state::RunState;
use crate::script::Scene;
use crate::text::Language;
use crate::toolkit::{FrameSpec, MediaToolkit};
use crate::usage::UsageStore;
use crate::{logi, logok, logw};

pub use synthetic::SyntheticVisual;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Video,
    Image,
    Synthetic,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Video => "video",
            AssetKind::Image => "image",
            AssetKind::Synthetic => "synthetic",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            AssetKind::Image => "jpg",
            AssetKind::Video | AssetKind::Synthetic => "mp4",
        }
    }
}

/// One search hit, before any download.
#[derive(Debug, Clone, PartialEq)]
pub struct StockCandidate {
    pub provider: String,
    pub remote_id: String,
    pub kind: AssetKind,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub page_url: Option<String>,
    pub attribution: Option<String>,
}

impl StockCandidate {
    pub fn cooldown_key(&self) -> String {
        format!("{}:{}:{}", self.provider, self.kind.as_str(), self.remote_id).to_lowercase()
    }
}

/// The visual chosen for one scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisualAsset {
    pub kind: AssetKind,
    pub path: PathBuf,
    pub provider: String,
    pub query: String,
    pub cooldown_key: String,
    pub remote_id: Option<String>,
    pub source_url: Option<String>,
    pub attribution: Option<String>,
}

#[async_trait]
pub trait StockProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_configured(&self) -> bool;
    async fn search(&self, query: &str, kind: AssetKind) -> Result<Vec<StockCandidate>>;
    async fn download(&self, candidate: &StockCandidate, out: &Path) -> Result<()>;
}

/// Per-scene visual selection: stock providers in order, then a synthetic clip.
pub struct VisualResolver {
    providers: Vec<Arc<dyn StockProvider>>,
    toolkit: Arc<dyn MediaToolkit>,
    cache: ArtifactCache,
    visuals: VisualConfig,
    thresholds: CacheConfig,
    frame: FrameSpec,
    language: Language,
}

enum Attempt {
    Selected(VisualAsset),
    Skipped,
    ProviderDown,
}

impl VisualResolver {
    pub fn new(
        providers: Vec<Arc<dyn StockProvider>>,
        toolkit: Arc<dyn MediaToolkit>,
        cache: ArtifactCache,
        visuals: VisualConfig,
        thresholds: CacheConfig,
        frame: FrameSpec,
        language: Language,
    ) -> Self {
        Self {
            providers,
            toolkit,
            cache,
            visuals,
            thresholds,
            frame,
            language,
        }
    }

    /// One asset per scene, in scene order. Never returns fewer assets than
    /// scenes: a scene with no viable stock hit gets a synthetic clip.
    pub async fn resolve_all(
        &self,
        scenes: &[Scene],
        allowed_keywords: &[String],
        state: &RunState,
        usage: &Mutex<UsageStore>,
    ) -> Result<Vec<VisualAsset>> {
        self.cache.ensure().await?;
        let mut assets = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            let asset = self
                .resolve_scene(index, scene, allowed_keywords, state, usage)
                .await?;
            logok(format!(
                "Scene {} visual: {} via {} ({})",
                index + 1,
                asset.kind.as_str(),
                asset.provider,
                asset.query
            ));
            assets.push(asset);
        }
        Ok(assets)
    }

    pub async fn resolve_scene(
        &self,
        index: usize,
        scene: &Scene,
        allowed_keywords: &[String],
        state: &RunState,
        usage: &Mutex<UsageStore>,
    ) -> Result<VisualAsset> {
        let queries = query::scene_queries(
            scene,
            allowed_keywords,
            self.visuals.queries_per_scene,
            self.language,
        )?;

        for query in &queries {
            for provider in &self.providers {
                if !provider.is_configured() || state.is_disabled(provider.name()) {
                    continue;
                }
                if let Some(asset) = self.search_provider(provider.as_ref(), query, state, usage).await? {
                    return Ok(asset);
                }
            }
        }

        let query = queries.first().cloned().unwrap_or_default();
        logi(format!(
            "Scene {}: no viable stock visual; generating synthetic clip",
            index + 1
        ));
        self.synthesize(index, scene, query, state, usage).await
    }

    async fn search_provider(
        &self,
        provider: &dyn StockProvider,
        query: &str,
        state: &RunState,
        usage: &Mutex<UsageStore>,
    ) -> Result<Option<VisualAsset>> {
        for kind in [AssetKind::Video, AssetKind::Image] {
            if state.is_disabled(provider.name()) {
                return Ok(None);
            }
            state.count_call(provider.name());
            let candidates = match provider.search(query, kind).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    if is_hard_provider_failure(&err) {
                        state.disable(provider.name(), format!("{:#}", err));
                        return Ok(None);
                    }
                    logw(format!(
                        "{} {} search for '{}' failed: {:#}",
                        provider.name(),
                        kind.as_str(),
                        query,
                        err
                    ));
                    continue;
                }
            };
            debug!(
                "{} returned {} {} candidates for '{}'",
                provider.name(),
                candidates.len(),
                kind.as_str(),
                query
            );

            for candidate in &candidates {
                match self.try_candidate(provider, candidate, query, state, usage).await? {
                    Attempt::Selected(asset) => return Ok(Some(asset)),
                    Attempt::Skipped => {}
                    Attempt::ProviderDown => return Ok(None),
                }
            }
        }
        Ok(None)
    }

    fn is_viable_shape(&self, candidate: &StockCandidate) -> bool {
        self.fits_frame(candidate.width, candidate.height)
    }

    fn fits_frame(&self, width: u32, height: u32) -> bool {
        width >= self.visuals.min_clip_width && height >= self.visuals.min_clip_height && height > width
    }

    fn min_bytes(&self, kind: AssetKind) -> u64 {
        match kind {
            AssetKind::Image => self.thresholds.min_image_bytes,
            AssetKind::Video | AssetKind::Synthetic => self.thresholds.min_video_bytes,
        }
    }

    async fn try_candidate(
        &self,
        provider: &dyn StockProvider,
        candidate: &StockCandidate,
        query: &str,
        state: &RunState,
        usage: &Mutex<UsageStore>,
    ) -> Result<Attempt> {
        if !self.is_viable_shape(candidate) {
            return Ok(Attempt::Skipped);
        }
        let key = candidate.cooldown_key();
        if state.is_chosen(&key) {
            return Ok(Attempt::Skipped);
        }
        if usage.lock().await.in_cooldown(&key, Utc::now()) {
            debug!("{} is in cooldown", key);
            return Ok(Attempt::Skipped);
        }

        let path = self.cache.path_for(
            "stock",
            &content_key(&[candidate.url.as_str()]),
            candidate.kind.extension(),
        );
        let min_bytes = self.min_bytes(candidate.kind);
        if self.cache.is_hit(&path, min_bytes).await {
            debug!("cache hit for {}", key);
        } else {
            let part = path.with_extension("part");
            if let Err(err) = provider.download(candidate, &part).await {
                let _ = fs::remove_file(&part).await;
                if is_hard_provider_failure(&err) {
                    state.disable(provider.name(), format!("{:#}", err));
                    return Ok(Attempt::ProviderDown);
                }
                logw(format!("{} download failed: {:#}", key, err));
                return Ok(Attempt::Skipped);
            }
            if !self.cache.is_hit(&part, min_bytes).await {
                logw(format!("{} download below {} bytes; skipping", key, min_bytes));
                let _ = fs::remove_file(&part).await;
                return Ok(Attempt::Skipped);
            }
            if let Err(err) = fs::rename(&part, &path).await {
                logw(format!("{} could not be moved into the cache: {}", key, err));
                let _ = fs::remove_file(&part).await;
                return Ok(Attempt::Skipped);
            }
        }

        // Metadata can lie; the file decides.
        match self.toolkit.probe_dimensions(&path).await {
            Ok((width, height)) if self.fits_frame(width, height) => {}
            Ok((width, height)) => {
                logw(format!("{} is {}x{} on disk; skipping", key, width, height));
                let _ = fs::remove_file(&path).await;
                return Ok(Attempt::Skipped);
            }
            Err(err) => {
                logw(format!("{} could not be probed: {:#}", key, err));
                return Ok(Attempt::Skipped);
            }
        }

        if !state.claim(&key) {
            return Ok(Attempt::Skipped);
        }
        self.record_use(&key, usage).await;

        Ok(Attempt::Selected(VisualAsset {
            kind: candidate.kind,
            path,
            provider: candidate.provider.clone(),
            query: query.to_string(),
            cooldown_key: key,
            remote_id: Some(candidate.remote_id.clone()),
            source_url: candidate.page_url.clone().or_else(|| Some(candidate.url.clone())),
            attribution: candidate.attribution.clone(),
        }))
    }

    async fn synthesize(
        &self,
        index: usize,
        scene: &Scene,
        query: String,
        state: &RunState,
        usage: &Mutex<UsageStore>,
    ) -> Result<VisualAsset> {
        let visual = SyntheticVisual::for_scene(&scene.text, index, self.visuals.synthetic_clip_seconds);
        let path = self.cache.path_for("synthetic", &visual.key, "mp4");
        if !self.cache.is_hit(&path, self.thresholds.min_video_bytes).await {
            self.toolkit
                .render_synthetic_visual(&visual, self.frame, &path)
                .await?;
        }

        let key = visual.cooldown_key();
        state.claim(&key);
        self.record_use(&key, usage).await;

        Ok(VisualAsset {
            kind: AssetKind::Synthetic,
            path,
            provider: "synthetic".to_string(),
            query,
            cooldown_key: key,
            remote_id: None,
            source_url: None,
            attribution: None,
        })
    }

    /// Marks and persists immediately; a failed save only costs cross-run dedup.
    async fn record_use(&self, key: &str, usage: &Mutex<UsageStore>) {
        let mut store = usage.lock().await;
        store.mark(key, Utc::now());
        if let Err(err) = store.save().await {
            warn!("failed to save visual usage store: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(width: u32, height: u32) -> StockCandidate {
        StockCandidate {
            provider: "Pexels".to_string(),
            remote_id: "42".to_string(),
            kind: AssetKind::Video,
            url: "https://example.test/42.mp4".to_string(),
            width,
            height,
            page_url: None,
            attribution: None,
        }
    }

    #[test]
    fn cooldown_key_is_provider_kind_id() {
        assert_eq!(candidate(1080, 1920).cooldown_key(), "pexels:video:42");
    }

    #[test]
    fn kind_maps_to_extension() {
        assert_eq!(AssetKind::Image.extension(), "jpg");
        assert_eq!(AssetKind::Synthetic.extension(), "mp4");
        assert_eq!(serde_json::to_string(&AssetKind::Video).unwrap(), "\"video\"");
    }
}
