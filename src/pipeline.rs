use anyhow::{Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::api::elevenlabs::ElevenLabs;
use crate::api::gtts::NetworkVoice;
use crate::api::pexels::Pexels;
use crate::api::pixabay::Pixabay;
use crate::cache::ArtifactCache;
use crate::compositor::{Composition, TimelineCompositor, check_background, is_supported_music};
use crate::config::Config;
use crate::ffmpeg::Ffmpeg;
use crate::narration::local_voice::LocalVoice;
use crate::narration::{NarrationSynthesizer, SpeechProvider, SyntheticCadence};
use crate::run_state::RunState;
use crate::script::Script;
use crate::subtitle::{build_entries, write_srt};
use crate::toolkit::{FrameSpec, MediaToolkit};
use crate::usage::{UsageNamespace, UsageStore};
use crate::visual::{StockProvider, VisualAsset, VisualResolver};
use crate::{logi, logok, logw};

#[derive(Debug, Clone, Serialize)]
pub struct SceneReport {
    pub index: usize,
    pub text: String,
    pub narration_provider: String,
    pub narration_cached: bool,
    pub narration_duration: f64,
    pub narration_failures: Vec<String>,
    pub visual: VisualAsset,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub title: String,
    pub created_at: String,
    pub video: PathBuf,
    pub subtitles: PathBuf,
    pub duration: f64,
    pub narration_duration: f64,
    pub narration_cache_hits: usize,
    pub narration_providers: BTreeMap<String, usize>,
    pub background_music: PathBuf,
    pub scenes: Vec<SceneReport>,
    pub api_calls: BTreeMap<String, u32>,
    pub disabled_providers: Vec<String>,
    pub render_seconds: f64,
}

/// Cascade order: premium voice, network voice, OS voice, synthetic cadence.
pub fn default_speech_providers(
    cfg: &Config,
    client: &reqwest::Client,
    toolkit: Arc<dyn MediaToolkit>,
) -> Vec<Arc<dyn SpeechProvider>> {
    let language = cfg.voice.language;
    vec![
        Arc::new(ElevenLabs::new(client.clone(), cfg)),
        Arc::new(NetworkVoice::new(
            client.clone(),
            language,
            cfg.narration.enable_network_voice,
        )),
        Arc::new(LocalVoice::new(
            toolkit.clone(),
            language,
            cfg.narration.enable_os_voice,
        )),
        Arc::new(SyntheticCadence::new(
            toolkit,
            cfg.narration.enable_synthetic_voice,
        )),
    ]
}

/// Primary then secondary stock provider.
pub fn default_stock_providers(cfg: &Config, client: &reqwest::Client) -> Vec<Arc<dyn StockProvider>> {
    vec![
        Arc::new(Pixabay::new(client.clone(), cfg.pixabay_key.clone())),
        Arc::new(Pexels::new(client.clone(), cfg.pexels_key.clone())),
    ]
}

pub struct Pipeline {
    cfg: Config,
    toolkit: Arc<dyn MediaToolkit>,
    speech: Vec<Arc<dyn SpeechProvider>>,
    stock: Vec<Arc<dyn StockProvider>>,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        toolkit: Arc<dyn MediaToolkit>,
        speech: Vec<Arc<dyn SpeechProvider>>,
        stock: Vec<Arc<dyn StockProvider>>,
    ) -> Self {
        Self {
            cfg,
            toolkit,
            speech,
            stock,
        }
    }

    /// Production wiring: ffmpeg toolkit and the real HTTP providers.
    pub fn from_config(cfg: Config) -> Result<Self> {
        let client = crate::api::build_client()?;
        let toolkit: Arc<dyn MediaToolkit> = Arc::new(Ffmpeg::from_config(&cfg));
        let speech = default_speech_providers(&cfg, &client, toolkit.clone());
        let stock = default_stock_providers(&cfg, &client);
        Ok(Self::new(cfg, toolkit, speech, stock))
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    fn frame(&self) -> FrameSpec {
        FrameSpec {
            width: self.cfg.render.width,
            height: self.cfg.render.height,
            fps: self.cfg.render.fps,
        }
    }

    pub async fn run(&self, script: &Script) -> Result<RunReport> {
        let started = Instant::now();
        let now = Utc::now();
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let base_name = format!("{}_{}", script.slug(), stamp);
        let paths = &self.cfg.paths;

        let work_dir = paths.work_dir.join(&base_name);
        for dir in [&work_dir, &paths.output_dir, &paths.cache_dir, &paths.data_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
        }
        if let Some(configured) = &self.cfg.render.background_music {
            check_background(configured)?;
        }

        logi(format!(
            "=== {} ({} scenes, ~{:.0}s) ===",
            script.title,
            script.scenes.len(),
            script.total_duration
        ));

        let state = RunState::new();
        let mut keyword_store = UsageStore::load(
            paths.keyword_usage(),
            UsageNamespace::Keywords,
            self.cfg.visuals.keyword_cooldown_days,
        )
        .await;
        let allowed = keyword_store.filter_allowed(&script.all_keywords(), now);
        logi(format!(
            "Keywords allowed after cooldown: {}/{}",
            allowed.len(),
            script.all_keywords().len()
        ));
        let visual_store = Mutex::new(
            UsageStore::load(
                paths.visual_usage(),
                UsageNamespace::VisualAssets,
                self.cfg.visuals.cooldown_days,
            )
            .await,
        );

        let cache = ArtifactCache::new(&paths.cache_dir);
        let synthesizer = NarrationSynthesizer::new(
            self.speech.clone(),
            self.toolkit.clone(),
            cache.clone(),
            &self.cfg,
        );
        let resolver = VisualResolver::new(
            self.stock.clone(),
            self.toolkit.clone(),
            cache,
            self.cfg.visuals.clone(),
            self.cfg.cache.clone(),
            self.frame(),
            self.cfg.voice.language,
        );

        let track_path = work_dir.join("narration.mp3");
        let (narration, visuals) = tokio::join!(
            synthesizer.synthesize_all(&script.scenes, &state, &track_path),
            resolver.resolve_all(&script.scenes, &allowed, &state, &visual_store),
        );
        let narration = narration?;
        let visuals = visuals?;
        logok(format!(
            "Narration ready: {:.2}s ({} cached)",
            narration.track_duration, narration.cache_hits
        ));

        let subtitles = build_entries(&script.scenes, &narration.durations())?;
        let music = self
            .choose_music(&work_dir, narration.track_duration)
            .await?;
        logi(format!("Background music: {}", music.display()));

        let video_path = paths.output_dir.join(format!("{}.mp4", base_name));
        let compositor = TimelineCompositor::new(
            self.toolkit.clone(),
            self.cfg.render.clone(),
            &work_dir,
        );
        let rendered = compositor
            .compose(&Composition {
                title: &script.title,
                narration: &narration,
                visuals: &visuals,
                subtitles: &subtitles,
                music: &music,
                out: &video_path,
            })
            .await?;

        // Only once the video exists.
        let srt_path = paths.output_dir.join(format!("{}.srt", base_name));
        if let Err(err) = write_srt(&subtitles, &srt_path).await {
            let _ = fs::remove_file(&rendered.path).await;
            return Err(err);
        }

        keyword_store.mark_all(script.all_keywords().iter().map(String::as_str), Utc::now());
        if let Err(err) = keyword_store.save().await {
            logw(format!("Failed to save keyword usage: {:#}", err));
        }

        let api_calls = state.api_calls();
        let report = RunReport {
            title: script.title.clone(),
            created_at: now.to_rfc3339(),
            video: rendered.path.clone(),
            subtitles: srt_path,
            duration: rendered.duration,
            narration_duration: narration.track_duration,
            narration_cache_hits: narration.cache_hits,
            narration_providers: narration.providers.clone(),
            background_music: music,
            scenes: script
                .scenes
                .iter()
                .zip(narration.clips.iter().zip(visuals))
                .map(|(scene, (clip, visual))| SceneReport {
                    index: clip.index,
                    text: scene.text.clone(),
                    narration_provider: clip.provider.clone(),
                    narration_cached: clip.cache_hit,
                    narration_duration: clip.duration,
                    narration_failures: clip.failures.clone(),
                    visual,
                })
                .collect(),
            api_calls: api_calls.clone(),
            disabled_providers: state.disabled_providers(),
            render_seconds: started.elapsed().as_secs_f64(),
        };

        let report_path = paths.output_dir.join(format!("{}_report.json", base_name));
        fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .await
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;

        for (provider, calls) in &api_calls {
            logi(format!("API calls {}: {}", provider, calls));
        }
        logok(format!(
            "DONE: {} in {:.1}s",
            rendered.path.display(),
            report.render_seconds
        ));
        Ok(report)
    }

    /// Configured track, else a random file from the music folder, else a
    /// generated ambient loop.
    async fn choose_music(&self, work_dir: &Path, duration: f64) -> Result<PathBuf> {
        if let Some(configured) = &self.cfg.render.background_music {
            check_background(configured)?;
            return Ok(configured.clone());
        }

        let songs = list_music(&self.cfg.paths.music_dir);
        let picked = songs.choose(&mut rand::thread_rng()).cloned();
        if let Some(song) = picked {
            return Ok(song);
        }

        logw("No background music found; generating an ambient loop.".to_string());
        let out = work_dir.join("fallback_music.mp3");
        self.toolkit.render_fallback_music(duration, &out).await?;
        Ok(out)
    }
}

pub fn list_music(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut songs: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported_music(path))
        .collect();
    songs.sort();
    songs
}
