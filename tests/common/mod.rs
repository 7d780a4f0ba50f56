#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use shorts_pipeline::ProviderError;
use shorts_pipeline::config::Config;
use shorts_pipeline::narration::SpeechProvider;
use shorts_pipeline::script::Scene;
use shorts_pipeline::toolkit::{
    FrameSpec, Loudness, MediaToolkit, MuxJob, OverlayImage, SegmentRender,
};
use shorts_pipeline::visual::{AssetKind, StockCandidate, StockProvider, SyntheticVisual};

/// Fake media files are small JSON documents padded past every cache threshold.
const DESCRIPTOR_BYTES: usize = 4096;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Descriptor {
    pub duration: f64,
    pub mean_db: f64,
    pub peak_db: f64,
    pub width: u32,
    pub height: u32,
    pub label: String,
}

impl Descriptor {
    pub fn audio(duration: f64, mean_db: f64, peak_db: f64) -> Self {
        Self {
            duration,
            mean_db,
            peak_db,
            ..Self::default()
        }
    }

    pub fn video(duration: f64, width: u32, height: u32) -> Self {
        Self {
            duration,
            mean_db: -91.0,
            peak_db: -91.0,
            width,
            height,
            ..Self::default()
        }
    }
}

pub fn write_descriptor(path: &Path, descriptor: &Descriptor) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let mut body = serde_json::to_string(descriptor).unwrap();
    while body.len() < DESCRIPTOR_BYTES {
        body.push(' ');
    }
    std::fs::write(path, body).unwrap();
}

pub fn read_descriptor(path: &Path) -> Result<Descriptor> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(raw.trim())?)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentCall {
    pub source: PathBuf,
    pub kind: AssetKind,
    pub target: f64,
    pub loops: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuxCall {
    pub duration: f64,
    pub music_loops: u32,
    pub overlays: Vec<(f64, f64, u32)>,
}

/// In-process stand-in for ffmpeg. Durations are carried in descriptor files
/// and every operation is recorded.
#[derive(Default)]
pub struct FakeToolkit {
    calls: Mutex<BTreeMap<&'static str, usize>>,
    pub segments: Mutex<Vec<SegmentCall>>,
    pub joins: Mutex<Vec<(Vec<f64>, f64)>>,
    pub trims: Mutex<Vec<f64>>,
    pub freezes: Mutex<Vec<f64>>,
    pub muxes: Mutex<Vec<MuxCall>>,
    /// Added to the computed length of every joined video.
    pub join_bias: Mutex<f64>,
    /// Makes the final mux fail.
    pub fail_mux: Mutex<bool>,
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, op: &'static str) {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        self.record("probe_duration");
        Ok(read_descriptor(path)?.duration)
    }

    async fn probe_dimensions(&self, path: &Path) -> Result<(u32, u32)> {
        self.record("probe_dimensions");
        let d = read_descriptor(path)?;
        Ok((d.width, d.height))
    }

    async fn measure_loudness(&self, path: &Path) -> Result<Loudness> {
        self.record("measure_loudness");
        let d = read_descriptor(path)?;
        Ok(Loudness {
            mean_db: d.mean_db,
            peak_db: d.peak_db,
        })
    }

    async fn transcode_audio(&self, input: &Path, out: &Path) -> Result<()> {
        self.record("transcode_audio");
        write_descriptor(out, &read_descriptor(input)?);
        Ok(())
    }

    async fn render_silence(&self, duration: f64, out: &Path) -> Result<()> {
        self.record("render_silence");
        write_descriptor(out, &Descriptor::audio(duration, -91.0, -91.0));
        Ok(())
    }

    async fn render_cadence(&self, duration: f64, out: &Path) -> Result<()> {
        self.record("render_cadence");
        write_descriptor(out, &Descriptor::audio(duration, -20.0, -4.0));
        Ok(())
    }

    async fn pad_with_silence(&self, input: &Path, target: f64, out: &Path) -> Result<()> {
        self.record("pad_with_silence");
        let mut d = read_descriptor(input)?;
        d.duration = d.duration.max(target);
        write_descriptor(out, &d);
        Ok(())
    }

    async fn concat_audio(&self, inputs: &[PathBuf], out: &Path) -> Result<()> {
        self.record("concat_audio");
        let mut total = 0.0;
        for input in inputs {
            total += read_descriptor(input)?.duration;
        }
        write_descriptor(out, &Descriptor::audio(total, -18.0, -3.0));
        Ok(())
    }

    async fn render_synthetic_visual(
        &self,
        visual: &SyntheticVisual,
        frame: FrameSpec,
        out: &Path,
    ) -> Result<()> {
        self.record("render_synthetic_visual");
        let mut d = Descriptor::video(visual.duration, frame.width, frame.height);
        d.label = format!("hue={} box={}", visual.hue, visual.box_offset);
        write_descriptor(out, &d);
        Ok(())
    }

    async fn render_segment(&self, segment: &SegmentRender<'_>, out: &Path) -> Result<()> {
        self.record("render_segment");
        self.segments.lock().unwrap().push(SegmentCall {
            source: segment.source.to_path_buf(),
            kind: segment.kind,
            target: segment.target,
            loops: segment.loops,
        });
        write_descriptor(
            out,
            &Descriptor::video(segment.target, segment.frame.width, segment.frame.height),
        );
        Ok(())
    }

    async fn join_segments(
        &self,
        inputs: &[PathBuf],
        durations: &[f64],
        crossfade: f64,
        out: &Path,
    ) -> Result<()> {
        self.record("join_segments");
        self.joins
            .lock()
            .unwrap()
            .push((durations.to_vec(), crossfade));
        let overlap = crossfade * (inputs.len().saturating_sub(1)) as f64;
        let total = durations.iter().sum::<f64>() - overlap + *self.join_bias.lock().unwrap();
        write_descriptor(out, &Descriptor::video(total, 1080, 1920));
        Ok(())
    }

    async fn trim_video(&self, input: &Path, duration: f64, out: &Path) -> Result<()> {
        self.record("trim_video");
        self.trims.lock().unwrap().push(duration);
        let mut d = read_descriptor(input)?;
        d.duration = duration;
        write_descriptor(out, &d);
        Ok(())
    }

    async fn freeze_tail(&self, input: &Path, extend_by: f64, out: &Path) -> Result<()> {
        self.record("freeze_tail");
        self.freezes.lock().unwrap().push(extend_by);
        let mut d = read_descriptor(input)?;
        d.duration += extend_by;
        write_descriptor(out, &d);
        Ok(())
    }

    async fn render_overlay(&self, overlay: &OverlayImage<'_>, out: &Path) -> Result<()> {
        self.record("render_overlay");
        let mut d = Descriptor::video(0.0, overlay.width, overlay.height);
        d.label = overlay.text.to_string();
        write_descriptor(out, &d);
        Ok(())
    }

    async fn render_fallback_music(&self, duration: f64, out: &Path) -> Result<()> {
        self.record("render_fallback_music");
        write_descriptor(out, &Descriptor::audio(duration, -20.0, -2.0));
        Ok(())
    }

    async fn mux(&self, job: &MuxJob<'_>) -> Result<()> {
        self.record("mux");
        if *self.fail_mux.lock().unwrap() {
            anyhow::bail!("mux failed");
        }
        self.muxes.lock().unwrap().push(MuxCall {
            duration: job.duration,
            music_loops: job.music_loops,
            overlays: job
                .overlays
                .iter()
                .map(|o| (o.start, o.end, o.y))
                .collect(),
        });
        write_descriptor(
            job.out,
            &Descriptor::video(job.duration, job.frame.width, job.frame.height),
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechOutcome {
    Audio { duration: f64, mean_db: f64, peak_db: f64 },
    Rejected,
    NetworkDown,
}

impl SpeechOutcome {
    pub fn clean(duration: f64) -> Self {
        SpeechOutcome::Audio {
            duration,
            mean_db: -18.0,
            peak_db: -3.0,
        }
    }

    pub fn with_mean(duration: f64, mean_db: f64) -> Self {
        SpeechOutcome::Audio {
            duration,
            mean_db,
            peak_db: -3.0,
        }
    }
}

/// Scripted speech provider. Each variant has a fixed outcome.
pub struct FakeSpeech {
    name: String,
    available: bool,
    scored: bool,
    outcomes: Vec<(String, SpeechOutcome)>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeSpeech {
    pub fn single(name: &str, outcome: SpeechOutcome) -> Self {
        Self::voices(name, false, vec![("", outcome)])
    }

    pub fn voices(name: &str, scored: bool, outcomes: Vec<(&str, SpeechOutcome)>) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            scored,
            outcomes: outcomes
                .into_iter()
                .map(|(v, o)| (v.to_string(), o))
                .collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn unavailable(name: &str) -> Self {
        let mut fake = Self::single(name, SpeechOutcome::clean(5.0));
        fake.available = false;
        fake
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn calls_for(&self, variant: &str) -> usize {
        self.calls.lock().unwrap().get(variant).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn variants(&self) -> Vec<String> {
        self.outcomes.iter().map(|(v, _)| v.clone()).collect()
    }

    fn quality_scored(&self) -> bool {
        self.scored
    }

    async fn synthesize(&self, _text: &str, variant: &str, out: &Path) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(variant.to_string())
            .or_insert(0) += 1;
        let outcome = self
            .outcomes
            .iter()
            .find(|(v, _)| v == variant)
            .map(|(_, o)| o.clone())
            .unwrap_or(SpeechOutcome::Rejected);
        match outcome {
            SpeechOutcome::Audio {
                duration,
                mean_db,
                peak_db,
            } => {
                write_descriptor(out, &Descriptor::audio(duration, mean_db, peak_db));
                Ok(())
            }
            SpeechOutcome::Rejected => Err(ProviderError::Rejected {
                provider: self.name.clone(),
                status: 500,
            }
            .into()),
            SpeechOutcome::NetworkDown => {
                Err(ProviderError::network(self.name.clone(), "connection refused").into())
            }
        }
    }
}

/// Scripted stock provider returning the same candidates for every query.
pub struct FakeStock {
    name: String,
    pub videos: Vec<StockCandidate>,
    pub images: Vec<StockCandidate>,
    pub network_down: bool,
    pub clip_seconds: f64,
    search_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl FakeStock {
    pub fn new(name: &str, videos: Vec<StockCandidate>) -> Self {
        Self {
            name: name.to_string(),
            videos,
            images: Vec::new(),
            network_down: false,
            clip_seconds: 3.0,
            search_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::new())
    }

    pub fn down(name: &str) -> Self {
        let mut fake = Self::empty(name);
        fake.network_down = true;
        fake
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

pub fn candidate(provider: &str, id: &str, width: u32, height: u32) -> StockCandidate {
    StockCandidate {
        provider: provider.to_string(),
        remote_id: id.to_string(),
        kind: AssetKind::Video,
        url: format!("https://{}.test/{}.mp4", provider, id),
        width,
        height,
        page_url: Some(format!("https://{}.test/page/{}", provider, id)),
        attribution: Some(format!("creator {}", id)),
    }
}

#[async_trait]
impl StockProvider for FakeStock {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn search(&self, _query: &str, kind: AssetKind) -> Result<Vec<StockCandidate>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if self.network_down {
            return Err(ProviderError::network(self.name.clone(), "timed out").into());
        }
        Ok(match kind {
            AssetKind::Video => self.videos.clone(),
            AssetKind::Image => self.images.clone(),
            AssetKind::Synthetic => Vec::new(),
        })
    }

    async fn download(&self, candidate: &StockCandidate, out: &Path) -> Result<()> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        write_descriptor(
            out,
            &Descriptor::video(self.clip_seconds, candidate.width, candidate.height),
        );
        Ok(())
    }
}

/// Defaults pointed into a temp dir, with cache thresholds below the
/// descriptor size.
pub fn test_config(root: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.paths.cache_dir = root.join("cache");
    cfg.paths.data_dir = root.join("data");
    cfg.paths.output_dir = root.join("output");
    cfg.paths.music_dir = root.join("music");
    cfg.paths.work_dir = root.join("work");
    cfg.cache.min_audio_bytes = 1024;
    cfg.cache.min_video_bytes = 1024;
    cfg.cache.min_image_bytes = 1024;
    cfg
}

pub fn scene(text: &str, keywords: &[&str], estimate: f64) -> Scene {
    Scene {
        text: text.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        tone: "neutral".to_string(),
        duration_estimate: estimate,
    }
}
