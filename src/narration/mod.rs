pub mod local_voice;
pub mod provider;
pub mod quality;

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::{ArtifactCache, content_key};
use crate::config::{Config, NarrationPolicy, QualityConfig, VoiceConfig};
use crate::error::{PipelineError, is_hard_provider_failure};
use crate::run_state::RunState;
use crate::script::Scene;
use crate::text::normalize_narration;
use crate::toolkit::MediaToolkit;
use crate::{logi, logok, logw};

pub use provider::{SpeechProvider, SyntheticCadence};
pub use quality::ClipMetrics;

pub const CACHE_PROVIDER: &str = "cache";
pub const SILENCE_PROVIDER: &str = "silence";

/// Max allowed drift between the summed clips and the concatenated track.
pub const TRACK_TOLERANCE: f64 = 0.05;
/// Clips this close to the padding cap are left alone.
const PAD_SKIP_MARGIN: f64 = 0.08;
/// A cached padded clip this close to the cap is reused.
const PAD_REUSE_MARGIN: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrationClip {
    pub index: usize,
    pub path: PathBuf,
    pub duration: f64,
    pub provider: String,
    pub cache_hit: bool,
    /// Reasons earlier tiers were passed over, in cascade order.
    pub failures: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NarrationTrack {
    pub clips: Vec<NarrationClip>,
    pub track_path: PathBuf,
    pub track_duration: f64,
    pub cache_hits: usize,
    pub providers: BTreeMap<String, usize>,
}

impl NarrationTrack {
    pub fn durations(&self) -> Vec<f64> {
        self.clips.iter().map(|c| c.duration).collect()
    }

    pub fn clip_sum(&self) -> f64 {
        self.clips.iter().map(|c| c.duration).sum()
    }
}

struct Candidate {
    path: PathBuf,
    duration: f64,
    score: f64,
}

/// Scene text -> validated audio clip, through the provider cascade.
pub struct NarrationSynthesizer {
    providers: Vec<Arc<dyn SpeechProvider>>,
    toolkit: Arc<dyn MediaToolkit>,
    cache: ArtifactCache,
    voice: VoiceConfig,
    policy: NarrationPolicy,
    quality: QualityConfig,
    min_audio_bytes: u64,
}

impl NarrationSynthesizer {
    pub fn new(
        providers: Vec<Arc<dyn SpeechProvider>>,
        toolkit: Arc<dyn MediaToolkit>,
        cache: ArtifactCache,
        cfg: &Config,
    ) -> Self {
        Self {
            providers,
            toolkit,
            cache,
            voice: cfg.voice.clone(),
            policy: cfg.narration.clone(),
            quality: cfg.quality.clone(),
            min_audio_bytes: cfg.cache.min_audio_bytes,
        }
    }

    /// Every scene in order, then one concatenated track.
    pub async fn synthesize_all(
        &self,
        scenes: &[Scene],
        state: &RunState,
        track_path: &Path,
    ) -> Result<NarrationTrack> {
        if scenes.is_empty() {
            return Err(PipelineError::EmptyScript.into());
        }
        self.cache.ensure().await?;

        let mut clips = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            let clip = self.synthesize_scene(index, scene, state).await?;
            logok(format!(
                "Scene {} narration: {:.2}s via {}{}",
                index + 1,
                clip.duration,
                clip.provider,
                if clip.cache_hit { " (cached)" } else { "" }
            ));
            clips.push(clip);
        }

        if let Some(parent) = track_path.parent() {
            fs::create_dir_all(parent).await.ok();
        }
        let paths: Vec<PathBuf> = clips.iter().map(|c| c.path.clone()).collect();
        self.toolkit.concat_audio(&paths, track_path).await?;
        let track_duration = self.toolkit.probe_duration(track_path).await?;

        let mut providers = BTreeMap::new();
        for clip in &clips {
            *providers.entry(clip.provider.clone()).or_insert(0) += 1;
        }
        let track = NarrationTrack {
            cache_hits: clips.iter().filter(|c| c.cache_hit).count(),
            clips,
            track_path: track_path.to_path_buf(),
            track_duration,
            providers,
        };

        let drift = (track.clip_sum() - track.track_duration).abs();
        if drift > TRACK_TOLERANCE {
            logw(format!(
                "Narration track is {:.3}s but clips sum to {:.3}s",
                track.track_duration,
                track.clip_sum()
            ));
        }
        Ok(track)
    }

    pub async fn synthesize_scene(
        &self,
        index: usize,
        scene: &Scene,
        state: &RunState,
    ) -> Result<NarrationClip> {
        self.cache.ensure().await?;
        let normalized = normalize_narration(
            &scene.text,
            self.voice.language,
            &self.voice.pronunciation_overrides,
        )?;
        let key = content_key(&["tts", self.voice.primary_voice_id(), &normalized]);

        let mut failures = Vec::new();
        let (path, duration, provider, cache_hit) = match self.cached(&key).await {
            Some((path, duration)) => (path, duration, CACHE_PROVIDER.to_string(), true),
            None => match self.run_cascade(index, &normalized, &key, state, &mut failures).await {
                Ok((path, duration, provider)) => (path, duration, provider, false),
                Err(reasons) => {
                    if !self.policy.allow_silent_fallback {
                        return Err(PipelineError::NarrationUnavailable {
                            index,
                            reasons: reasons.join("; "),
                        }
                        .into());
                    }
                    logw(format!(
                        "Scene {}: every voice failed; using silence ({})",
                        index + 1,
                        reasons.join("; ")
                    ));
                    let (path, duration) = self.silence(&key, scene.duration_estimate).await?;
                    (path, duration, SILENCE_PROVIDER.to_string(), false)
                }
            },
        };

        let (path, duration) = self.pad(&path, duration, scene.duration_estimate).await?;
        Ok(NarrationClip {
            index,
            path,
            duration,
            provider,
            cache_hit,
            failures,
        })
    }

    async fn measure(&self, path: &Path) -> Result<ClipMetrics> {
        let duration = self.toolkit.probe_duration(path).await?;
        let loudness = self.toolkit.measure_loudness(path).await?;
        Ok(ClipMetrics { duration, loudness })
    }

    /// Cached clip, re-validated. Invalid entries are deleted.
    async fn cached(&self, key: &str) -> Option<(PathBuf, f64)> {
        let path = self.cache.path_for("tts", key, "mp3");
        if !self.cache.is_hit(&path, self.min_audio_bytes).await {
            return None;
        }
        let verdict = match self.measure(&path).await {
            Ok(metrics) => quality::validate(&metrics, &self.quality).map(|_| metrics.duration),
            Err(err) => Err(format!("{:#}", err)),
        };
        match verdict {
            Ok(duration) => Some((path, duration)),
            Err(reason) => {
                warn!("discarding cached narration {}: {}", path.display(), reason);
                let _ = fs::remove_file(&path).await;
                None
            }
        }
    }

    /// First validated provider result wins. On exhaustion returns the
    /// failure reasons collected along the way.
    async fn run_cascade(
        &self,
        index: usize,
        text: &str,
        key: &str,
        state: &RunState,
        reasons: &mut Vec<String>,
    ) -> std::result::Result<(PathBuf, f64, String), Vec<String>> {
        for provider in &self.providers {
            let name = provider.name();
            if !provider.is_available() {
                debug!("{} not available; skipping", name);
                reasons.push(format!("{}: not available", name));
                continue;
            }
            if state.is_disabled(name) {
                reasons.push(format!("{}: disabled for this run", name));
                continue;
            }

            logi(format!("Scene {}: trying {}", index + 1, name));
            match self.attempt_provider(index, provider.as_ref(), text, key, state, reasons).await {
                Some(candidate) => {
                    let prefix = if provider.cacheable() { "tts" } else { "tts_cadence" };
                    let dest = self.cache.path_for(prefix, key, "mp3");
                    if let Err(err) = fs::rename(&candidate.path, &dest).await {
                        record_failure(index, reasons, format!("{}: cache write failed: {}", name, err));
                        let _ = fs::remove_file(&candidate.path).await;
                        continue;
                    }
                    debug!("{} accepted with score {:.1}", name, candidate.score);
                    return Ok((dest, candidate.duration, name.to_string()));
                }
                None => continue,
            }
        }
        Err(reasons.clone())
    }

    async fn attempt_provider(
        &self,
        index: usize,
        provider: &dyn SpeechProvider,
        text: &str,
        key: &str,
        state: &RunState,
        reasons: &mut Vec<String>,
    ) -> Option<Candidate> {
        let name = provider.name();
        let scored = provider.quality_scored();
        let mut best: Option<Candidate> = None;

        for (n, variant) in provider.variants().iter().enumerate() {
            let out = self
                .cache
                .dir()
                .join(format!("tts_{}.{}.{}.part.mp3", key, name, n));

            if provider.is_remote() {
                state.count_call(name);
            }
            if let Err(err) = provider.synthesize(text, variant, &out).await {
                let _ = fs::remove_file(&out).await;
                record_failure(index, reasons, format!("{}: {:#}", name, err));
                if is_hard_provider_failure(&err) {
                    state.disable(name, format!("{:#}", err));
                    break;
                }
                continue;
            }

            let metrics = match self.measure(&out).await {
                Ok(metrics) => metrics,
                Err(err) => {
                    let _ = fs::remove_file(&out).await;
                    record_failure(index, reasons, format!("{}: unreadable output: {:#}", name, err));
                    continue;
                }
            };
            if let Err(reason) = quality::validate(&metrics, &self.quality) {
                let _ = fs::remove_file(&out).await;
                record_failure(index, reasons, format!("{}: {}", name, reason));
                continue;
            }

            let score = quality::score(&metrics, &self.quality);
            let candidate = Candidate {
                path: out,
                duration: metrics.duration,
                score,
            };
            if !scored || score >= self.quality.accept_score {
                if let Some(previous) = best.take() {
                    let _ = fs::remove_file(&previous.path).await;
                }
                return Some(candidate);
            }

            debug!("{} voice '{}' scored {:.1}", name, variant, score);
            let improves = best
                .as_ref()
                .map_or(true, |current| candidate.score > current.score);
            let discard = if improves {
                best.replace(candidate).map(|previous| previous.path)
            } else {
                Some(candidate.path)
            };
            if let Some(path) = discard {
                let _ = fs::remove_file(&path).await;
            }
        }

        if let Some(candidate) = &best {
            logw(format!(
                "{}: no voice reached score {:.0}; keeping best at {:.1}",
                name, self.quality.accept_score, candidate.score
            ));
        }
        best
    }

    async fn silence(&self, key: &str, estimate: f64) -> Result<(PathBuf, f64)> {
        let duration = estimate.max(1.0);
        let length = format!("{:.2}", duration);
        let silent_key = content_key(&["silence", key, &length]);
        let path = self.cache.path_for("tts_silent", &silent_key, "mp3");
        if !self.cache.is_hit(&path, 1).await {
            self.toolkit.render_silence(duration, &path).await?;
        }
        let measured = self.toolkit.probe_duration(&path).await?;
        Ok((path, measured))
    }

    /// Trailing silence only, up to `min(estimate, measured + max_pad_extension)`.
    async fn pad(&self, source: &Path, measured: f64, estimate: f64) -> Result<(PathBuf, f64)> {
        if estimate <= 0.0 {
            return Ok((source.to_path_buf(), measured));
        }
        let cap = estimate.min(measured + self.policy.max_pad_extension);
        if measured >= cap - PAD_SKIP_MARGIN {
            return Ok((source.to_path_buf(), measured));
        }

        let source_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let cap_label = format!("{:.2}", cap);
        let source_label = format!("{:.3}", measured);
        let pad_key = content_key(&["pad", &source_name, &source_label, &cap_label]);
        let padded = self.cache.path_for("tts_pad", &pad_key, "mp3");

        if self.cache.is_hit(&padded, self.min_audio_bytes).await {
            if let Ok(existing) = self.toolkit.probe_duration(&padded).await {
                if existing >= cap - PAD_REUSE_MARGIN {
                    return Ok((padded, existing));
                }
            }
        }

        self.toolkit.pad_with_silence(source, cap, &padded).await?;
        let duration = self.toolkit.probe_duration(&padded).await?;
        Ok((padded, duration))
    }
}

fn record_failure(index: usize, reasons: &mut Vec<String>, reason: String) {
    logw(format!("Scene {}: {}", index + 1, reason));
    reasons.push(reason);
}
