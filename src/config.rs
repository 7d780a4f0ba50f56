use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::text::Language;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "elevenlabs_api_key")]
    pub elevenlabs_key: String,
    #[serde(rename = "pexels_api_key")]
    pub pexels_key: String,
    #[serde(rename = "pixabay_api_key")]
    pub pixabay_key: String,
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
    pub voice: VoiceConfig,
    pub narration: NarrationPolicy,
    pub quality: QualityConfig,
    pub visuals: VisualConfig,
    pub cache: CacheConfig,
    pub render: RenderConfig,
    pub paths: PathsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elevenlabs_key: String::new(),
            pexels_key: String::new(),
            pixabay_key: String::new(),
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
            voice: VoiceConfig::default(),
            narration: NarrationPolicy::default(),
            quality: QualityConfig::default(),
            visuals: VisualConfig::default(),
            cache: CacheConfig::default(),
            render: RenderConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Premium voice candidates, tried in order. The first one keys the cache.
    #[serde(rename = "eleven_voice_ids")]
    pub voice_ids: Vec<String>,
    #[serde(rename = "eleven_model_id")]
    pub model_id: String,
    pub language: Language,
    pub pronunciation_overrides: BTreeMap<String, String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_ids: vec![default_voice_id()],
            model_id: default_model_id(),
            language: Language::English,
            pronunciation_overrides: BTreeMap::new(),
        }
    }
}

impl VoiceConfig {
    pub fn primary_voice_id(&self) -> &str {
        self.voice_ids
            .first()
            .map(String::as_str)
            .unwrap_or("default")
    }
}

fn default_voice_id() -> String {
    "JBFqnCBsd6RMkjVDRZzb".to_string()
}

fn default_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationPolicy {
    pub allow_silent_fallback: bool,
    pub enable_network_voice: bool,
    pub enable_os_voice: bool,
    pub enable_synthetic_voice: bool,
    /// Longest trailing silence appended to reach a scene's target.
    pub max_pad_extension: f64,
}

impl Default for NarrationPolicy {
    fn default() -> Self {
        Self {
            allow_silent_fallback: false,
            enable_network_voice: true,
            enable_os_voice: true,
            enable_synthetic_voice: true,
            max_pad_extension: 0.35,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub accept_score: f64,
    pub target_mean_db: f64,
    pub target_peak_db: f64,
    pub short_duration: f64,
    pub min_mean_db: f64,
    pub mean_weight: f64,
    pub peak_weight: f64,
    pub short_weight: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            accept_score: 85.0,
            target_mean_db: -18.0,
            target_peak_db: -3.0,
            short_duration: 4.0,
            min_mean_db: -55.0,
            mean_weight: 2.0,
            peak_weight: 1.5,
            short_weight: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub min_clip_width: u32,
    pub min_clip_height: u32,
    pub cooldown_days: i64,
    pub keyword_cooldown_days: i64,
    pub queries_per_scene: usize,
    pub synthetic_clip_seconds: f64,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            min_clip_width: 720,
            min_clip_height: 1280,
            cooldown_days: 3,
            keyword_cooldown_days: 3,
            queries_per_scene: 2,
            synthetic_clip_seconds: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub min_audio_bytes: u64,
    pub min_video_bytes: u64,
    pub min_image_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_audio_bytes: 2_048,
            min_video_bytes: 200_000,
            min_image_bytes: 1_024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crossfades: bool,
    pub crossfade: f64,
    pub voice_gain: f64,
    pub music_gain: f64,
    pub background_music: Option<PathBuf>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            crossfades: true,
            crossfade: 0.16,
            voice_gain: 1.0,
            music_gain: 0.16,
            background_music: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub music_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("assets/cache"),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            music_dir: PathBuf::from("assets/music"),
            work_dir: PathBuf::from("work"),
        }
    }
}

impl PathsConfig {
    pub fn keyword_usage(&self) -> PathBuf {
        self.data_dir.join("used_keywords.json")
    }

    pub fn visual_usage(&self) -> PathBuf {
        self.data_dir.join("clip_usage.json")
    }
}

impl Config {
    /// Reads the config file if present, then applies environment overrides.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if fs::try_exists(path).await.unwrap_or(false) {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            tracing::info!("No config at {}; using defaults", path.display());
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = read("ELEVENLABS_API_KEY") {
            self.elevenlabs_key = v;
        }
        if let Some(v) = read("PEXELS_API_KEY") {
            self.pexels_key = v;
        }
        if let Some(v) = read("PIXABAY_API_KEY") {
            self.pixabay_key = v;
        }
        if let Some(v) = read("FFMPEG_BINARY") {
            self.ffmpeg_binary = v;
        }
        if let Some(v) = read("FFPROBE_BINARY") {
            self.ffprobe_binary = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.render;
        if r.width == 0 || r.height == 0 {
            anyhow::bail!("config.json: render resolution must be non-zero");
        }
        if r.width % 2 != 0 || r.height % 2 != 0 {
            anyhow::bail!("config.json: render resolution must be even for yuv420p");
        }
        if r.fps == 0 {
            anyhow::bail!("config.json: render fps must be positive");
        }
        if r.voice_gain < 0.0 || r.music_gain < 0.0 {
            anyhow::bail!("config.json: mix gains must be non-negative");
        }
        if r.crossfade < 0.0 {
            anyhow::bail!("config.json: crossfade must be non-negative");
        }
        if !(0.0..=100.0).contains(&self.quality.accept_score) {
            anyhow::bail!("config.json: quality.accept_score must be within 0..=100");
        }
        if self.narration.max_pad_extension < 0.0 {
            anyhow::bail!("config.json: narration.max_pad_extension must be non-negative");
        }
        if self.visuals.queries_per_scene == 0 {
            anyhow::bail!("config.json: visuals.queries_per_scene must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"pexels_api_key":"abc","render":{"fps":25},"narration":{"allow_silent_fallback":true}}"#,
        )
        .unwrap();
        assert_eq!(cfg.pexels_key, "abc");
        assert_eq!(cfg.render.fps, 25);
        assert_eq!(cfg.render.width, 1080);
        assert!(cfg.narration.allow_silent_fallback);
        assert!(cfg.narration.enable_synthetic_voice);
        assert_eq!(cfg.voice.primary_voice_id(), "JBFqnCBsd6RMkjVDRZzb");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_non_empty_values_only() {
        let mut cfg = Config {
            pixabay_key: "from-file".to_string(),
            ..Config::default()
        };
        cfg.apply_env(|key| match key {
            "ELEVENLABS_API_KEY" => Some("  eleven  ".to_string()),
            "PIXABAY_API_KEY" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.elevenlabs_key, "eleven");
        assert_eq!(cfg.pixabay_key, "from-file");
    }

    #[test]
    fn validate_rejects_odd_resolution_and_bad_threshold() {
        let mut cfg = Config::default();
        cfg.render.width = 1079;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.quality.accept_score = 120.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_voice_list_falls_back_to_default_key() {
        let mut cfg = Config::default();
        cfg.voice.voice_ids.clear();
        assert_eq!(cfg.voice.primary_voice_id(), "default");
    }
}
