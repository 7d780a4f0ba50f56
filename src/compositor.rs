use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

use crate::config::RenderConfig;
use crate::error::PipelineError;
use crate::narration::NarrationTrack;
use crate::subtitle::SubtitleEntry;
use crate::timeline::{self, Reconcile, TimelinePlan};
use crate::toolkit::{FrameSpec, MediaToolkit, MuxJob, OverlayImage, OverlayPlacement, SegmentRender};
use crate::visual::{AssetKind, VisualAsset};
use crate::{logi, logok};

pub const SUPPORTED_MUSIC_EXTENSIONS: [&str; 6] = ["mp3", "m4a", "wav", "aac", "ogg", "flac"];

const SUBTITLE_BAND_HEIGHT: u32 = 210;
const SUBTITLE_FONT_SIZE: u32 = 52;
const SUBTITLE_BOTTOM_OFFSET: u32 = 340;
const SUBTITLE_LINE_CHARS: usize = 30;
const SUBTITLE_LINES: usize = 2;
const TITLE_BAND_HEIGHT: u32 = 160;
const TITLE_FONT_SIZE: u32 = 44;
const TITLE_MAX_CHARS: usize = 60;
const TITLE_Y: u32 = 60;

pub fn is_supported_music(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| SUPPORTED_MUSIC_EXTENSIONS.contains(&e.as_str()))
}

pub fn check_background(path: &Path) -> Result<()> {
    if is_supported_music(path) {
        Ok(())
    } else {
        Err(PipelineError::UnsupportedBackground(path.display().to_string()).into())
    }
}

pub struct Composition<'a> {
    pub title: &'a str,
    pub narration: &'a NarrationTrack,
    pub visuals: &'a [VisualAsset],
    pub subtitles: &'a [SubtitleEntry],
    pub music: &'a Path,
    pub out: &'a Path,
}

#[derive(Debug, Clone)]
pub struct RenderedVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub plan: TimelinePlan,
    pub reconcile: Reconcile,
}

/// Binds measured narration, visuals and subtitles into one render.
pub struct TimelineCompositor {
    toolkit: Arc<dyn MediaToolkit>,
    render: RenderConfig,
    work_dir: PathBuf,
}

impl TimelineCompositor {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, render: RenderConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            toolkit,
            render,
            work_dir: work_dir.into(),
        }
    }

    pub fn frame(&self) -> FrameSpec {
        FrameSpec {
            width: self.render.width,
            height: self.render.height,
            fps: self.render.fps,
        }
    }

    /// Renders the final file. On any failure the output path is removed so a
    /// partial file is never left behind.
    pub async fn compose(&self, job: &Composition<'_>) -> Result<RenderedVideo> {
        let result = self.compose_inner(job).await;
        if result.is_err() {
            let _ = fs::remove_file(job.out).await;
        }
        result
    }

    async fn compose_inner(&self, job: &Composition<'_>) -> Result<RenderedVideo> {
        if job.visuals.is_empty() {
            return Err(PipelineError::NoSceneClips.into());
        }
        let authoritative = job.narration.track_duration;
        if authoritative <= 0.0 {
            return Err(PipelineError::ZeroDurationNarration.into());
        }
        check_background(job.music)?;
        if job.subtitles.len() != job.visuals.len() {
            return Err(PipelineError::SceneCountMismatch {
                what: "subtitles",
                expected: job.visuals.len(),
                actual: job.subtitles.len(),
            }
            .into());
        }
        fs::create_dir_all(&self.work_dir).await?;

        let mut sources = Vec::with_capacity(job.visuals.len());
        for visual in job.visuals {
            let native = match visual.kind {
                AssetKind::Image => 0.0,
                AssetKind::Video | AssetKind::Synthetic => {
                    self.toolkit.probe_duration(&visual.path).await?
                }
            };
            sources.push((visual.kind, native));
        }

        let plan = timeline::plan(
            &job.narration.durations(),
            &sources,
            authoritative,
            self.render.crossfades,
            self.render.crossfade,
        )?;

        let frame = self.frame();
        let mut segments = Vec::with_capacity(plan.segments.len());
        for (segment, visual) in plan.segments.iter().zip(job.visuals) {
            let out = self.work_dir.join(format!("segment_{:02}.mp4", segment.index));
            debug!(
                "segment {}: {:.3}s from {:.3}s source x{}",
                segment.index, segment.target, segment.native, segment.loops
            );
            self.toolkit
                .render_segment(
                    &SegmentRender {
                        source: &visual.path,
                        kind: segment.kind,
                        target: segment.target,
                        loops: segment.loops,
                        frame,
                    },
                    &out,
                )
                .await?;
            segments.push(out);
        }
        logi(format!("Rendered {} scene segments", segments.len()));

        let joined = self.work_dir.join("joined.mp4");
        self.toolkit
            .join_segments(&segments, &plan.targets(), plan.crossfade, &joined)
            .await?;

        let joined_duration = self.toolkit.probe_duration(&joined).await?;
        let reconcile = timeline::reconcile(joined_duration, authoritative);
        debug!(
            "joined {:.3}s (planned {:.3}s) against narration {:.3}s: {:?}",
            joined_duration, plan.joined_duration, authoritative, reconcile
        );
        let video = match reconcile {
            Reconcile::Exact => joined,
            Reconcile::Trim(length) => {
                let out = self.work_dir.join("reconciled.mp4");
                self.toolkit.trim_video(&joined, length, &out).await?;
                out
            }
            Reconcile::Freeze(extend_by) => {
                let out = self.work_dir.join("reconciled.mp4");
                self.toolkit.freeze_tail(&joined, extend_by, &out).await?;
                out
            }
        };

        let overlays = self.render_overlays(job.title, job.subtitles, authoritative).await?;

        let music_duration = self.toolkit.probe_duration(job.music).await?;
        let music_loops = timeline::music_loops(music_duration, authoritative);

        if let Some(parent) = job.out.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.toolkit
            .mux(&MuxJob {
                video: &video,
                narration: &job.narration.track_path,
                music: job.music,
                music_loops,
                duration: authoritative,
                voice_gain: self.render.voice_gain,
                music_gain: self.render.music_gain,
                overlays: &overlays,
                frame,
                out: job.out,
            })
            .await?;

        let duration = self.toolkit.probe_duration(job.out).await?;
        logok(format!(
            "Rendered {} ({:.2}s, narration {:.2}s)",
            job.out.display(),
            duration,
            authoritative
        ));
        Ok(RenderedVideo {
            path: job.out.to_path_buf(),
            duration,
            plan,
            reconcile,
        })
    }

    async fn render_overlays(
        &self,
        title: &str,
        subtitles: &[SubtitleEntry],
        duration: f64,
    ) -> Result<Vec<OverlayPlacement>> {
        let width = self.render.width;
        let subtitle_y = self.render.height.saturating_sub(SUBTITLE_BOTTOM_OFFSET);
        let mut placements = Vec::with_capacity(subtitles.len() + 1);

        for entry in subtitles {
            let image = self.work_dir.join(format!("subtitle_{:02}.png", entry.sequence));
            self.toolkit
                .render_overlay(
                    &OverlayImage {
                        text: &entry.text,
                        width,
                        height: SUBTITLE_BAND_HEIGHT,
                        font_size: SUBTITLE_FONT_SIZE,
                        max_line_chars: SUBTITLE_LINE_CHARS,
                        max_lines: SUBTITLE_LINES,
                    },
                    &image,
                )
                .await?;
            placements.push(OverlayPlacement {
                image,
                start: entry.start,
                end: entry.end,
                y: subtitle_y,
            });
        }

        let title: String = title.chars().take(TITLE_MAX_CHARS).collect();
        let image = self.work_dir.join("title.png");
        self.toolkit
            .render_overlay(
                &OverlayImage {
                    text: &title,
                    width,
                    height: TITLE_BAND_HEIGHT,
                    font_size: TITLE_FONT_SIZE,
                    max_line_chars: TITLE_MAX_CHARS,
                    max_lines: 1,
                },
                &image,
            )
            .await?;
        placements.push(OverlayPlacement {
            image,
            start: 0.0,
            end: duration,
            y: TITLE_Y,
        });
        Ok(placements)
    }
}
