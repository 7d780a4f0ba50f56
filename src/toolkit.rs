use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::visual::{AssetKind, SyntheticVisual};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loudness {
    pub mean_db: f64,
    pub peak_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// One scene clip: fit to the frame, looped whole `loops` times, cut to `target`.
#[derive(Debug, Clone)]
pub struct SegmentRender<'a> {
    pub source: &'a Path,
    pub kind: AssetKind,
    pub target: f64,
    pub loops: u32,
    pub frame: FrameSpec,
}

#[derive(Debug, Clone)]
pub struct OverlayImage<'a> {
    pub text: &'a str,
    pub width: u32,
    pub height: u32,
    pub font_size: u32,
    pub max_line_chars: usize,
    pub max_lines: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayPlacement {
    pub image: PathBuf,
    pub start: f64,
    pub end: f64,
    pub y: u32,
}

#[derive(Debug, Clone)]
pub struct MuxJob<'a> {
    pub video: &'a Path,
    pub narration: &'a Path,
    pub music: &'a Path,
    pub music_loops: u32,
    pub duration: f64,
    pub voice_gain: f64,
    pub music_gain: f64,
    pub overlays: &'a [OverlayPlacement],
    pub frame: FrameSpec,
    pub out: &'a Path,
}

/// Every probe and encode the pipeline performs. The production
/// implementation is [`crate::ffmpeg::Ffmpeg`].
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe_duration(&self, path: &Path) -> Result<f64>;
    async fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32)>;
    async fn measure_loudness(&self, path: &Path) -> Result<Loudness>;

    async fn transcode_audio(&self, input: &Path, out: &Path) -> Result<()>;
    async fn render_silence(&self, duration: f64, out: &Path) -> Result<()>;
    async fn render_cadence(&self, duration: f64, out: &Path) -> Result<()>;
    async fn pad_with_silence(&self, input: &Path, target: f64, out: &Path) -> Result<()>;
    async fn concat_audio(&self, inputs: &[PathBuf], out: &Path) -> Result<()>;

    async fn render_synthetic_visual(
        &self,
        visual: &SyntheticVisual,
        frame: FrameSpec,
        out: &Path,
    ) -> Result<()>;
    async fn render_segment(&self, segment: &SegmentRender<'_>, out: &Path) -> Result<()>;
    async fn join_segments(
        &self,
        inputs: &[PathBuf],
        durations: &[f64],
        crossfade: f64,
        out: &Path,
    ) -> Result<()>;
    async fn trim_video(&self, input: &Path, duration: f64, out: &Path) -> Result<()>;
    async fn freeze_tail(&self, input: &Path, extend_by: f64, out: &Path) -> Result<()>;

    async fn render_overlay(&self, overlay: &OverlayImage<'_>, out: &Path) -> Result<()>;
    async fn render_fallback_music(&self, duration: f64, out: &Path) -> Result<()>;
    async fn mux(&self, job: &MuxJob<'_>) -> Result<()>;
}

/// Greedy word wrap, truncated to `max_lines`.
pub fn wrap_lines(text: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.truncate(max_lines);
    lines
}
