use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::PipelineError;
use crate::script::Scene;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtitleEntry {
    pub sequence: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Lays entries end to end from measured narration durations. `end(i)` is the
/// running cursor that becomes `start(i + 1)`, so there are no gaps or overlaps.
pub fn build_entries(scenes: &[Scene], durations: &[f64]) -> Result<Vec<SubtitleEntry>> {
    if scenes.len() != durations.len() {
        return Err(PipelineError::SceneCountMismatch {
            what: "subtitle durations",
            expected: scenes.len(),
            actual: durations.len(),
        }
        .into());
    }

    let mut cursor = 0.0;
    let mut entries = Vec::with_capacity(scenes.len());
    for (i, (scene, duration)) in scenes.iter().zip(durations).enumerate() {
        let start = cursor;
        cursor += duration;
        entries.push(SubtitleEntry {
            sequence: i + 1,
            start,
            end: cursor,
            text: scene.text.split_whitespace().collect::<Vec<_>>().join(" "),
        });
    }
    Ok(entries)
}

/// `HH:MM:SS,mmm`, rounded to the nearest millisecond.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms % 3_600_000) / 60_000;
    let s = (total_ms % 60_000) / 1000;
    let ms = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

pub fn to_srt(entries: &[SubtitleEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "{}\n{} --> {}\n{}\n",
                e.sequence,
                format_timestamp(e.start),
                format_timestamp(e.end),
                e.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn write_srt(entries: &[SubtitleEntry], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    let mut out = fs::File::create(path)
        .await
        .with_context(|| format!("create srt output: {}", path.display()))?;
    out.write_all(to_srt(entries).as_bytes()).await?;
    out.flush().await.ok();
    Ok(())
}
