use anyhow::Result;

use crate::error::PipelineError;
use crate::visual::AssetKind;

/// Joined video within this distance of the narration length is left as is.
pub const RECONCILE_TOLERANCE: f64 = 0.02;

/// Duration planning for one scene clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub index: usize,
    pub kind: AssetKind,
    /// Position of the scene on the narration timeline.
    pub start: f64,
    pub end: f64,
    /// Rendered clip length, including any crossfade overlap.
    pub target: f64,
    pub native: f64,
    /// Whole plays of the source needed to cover `target`.
    pub loops: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconcile {
    Exact,
    Trim(f64),
    Freeze(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    pub segments: Vec<SegmentPlan>,
    pub crossfade: f64,
    pub joined_duration: f64,
    pub authoritative: f64,
    pub reconcile: Reconcile,
}

impl TimelinePlan {
    pub fn targets(&self) -> Vec<f64> {
        self.segments.iter().map(|s| s.target).collect()
    }
}

/// Crossfades only apply between two or more scenes.
pub fn overlap(scene_count: usize, crossfades: bool, crossfade: f64) -> f64 {
    if crossfades && scene_count > 1 {
        crossfade.max(0.0)
    } else {
        0.0
    }
}

/// Stills are held, never looped.
pub fn loops_needed(kind: AssetKind, native: f64, target: f64) -> u32 {
    if kind == AssetKind::Image || native >= target || native <= 0.0 {
        return 1;
    }
    (target / native).ceil().max(1.0) as u32
}

pub fn joined_duration(targets: &[f64], overlap: f64) -> f64 {
    let n = targets.len();
    if n == 0 {
        return 0.0;
    }
    targets.iter().sum::<f64>() - overlap * (n as f64 - 1.0)
}

pub fn reconcile(joined: f64, authoritative: f64) -> Reconcile {
    let diff = authoritative - joined;
    if diff.abs() <= RECONCILE_TOLERANCE {
        Reconcile::Exact
    } else if diff < 0.0 {
        Reconcile::Trim(authoritative)
    } else {
        Reconcile::Freeze(diff)
    }
}

pub fn music_loops(music_duration: f64, total: f64) -> u32 {
    if music_duration <= 0.0 || music_duration >= total {
        return 1;
    }
    (total / music_duration).ceil() as u32
}

/// Non-last scenes get the crossfade overlap added so the joined timeline
/// lands on the narration sum.
pub fn plan(
    durations: &[f64],
    sources: &[(AssetKind, f64)],
    authoritative: f64,
    crossfades: bool,
    crossfade: f64,
) -> Result<TimelinePlan> {
    if sources.is_empty() {
        return Err(PipelineError::NoSceneClips.into());
    }
    if durations.len() != sources.len() {
        return Err(PipelineError::SceneCountMismatch {
            what: "scene visuals",
            expected: durations.len(),
            actual: sources.len(),
        }
        .into());
    }
    if authoritative <= 0.0 {
        return Err(PipelineError::ZeroDurationNarration.into());
    }

    let n = durations.len();
    let c = overlap(n, crossfades, crossfade);
    let mut cursor = 0.0;
    let mut segments = Vec::with_capacity(n);
    for (index, (duration, (kind, native))) in durations.iter().zip(sources).enumerate() {
        let target = if index + 1 < n { duration + c } else { *duration };
        segments.push(SegmentPlan {
            index,
            kind: *kind,
            start: cursor,
            end: cursor + duration,
            target,
            native: *native,
            loops: loops_needed(*kind, *native, target),
        });
        cursor += duration;
    }

    let targets: Vec<f64> = segments.iter().map(|s| s.target).collect();
    let joined = joined_duration(&targets, c);
    Ok(TimelinePlan {
        segments,
        crossfade: c,
        joined_duration: joined,
        authoritative,
        reconcile: reconcile(joined, authoritative),
    })
}
