use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::PipelineError;

pub const MIN_SCENE_SECONDS: f64 = 4.0;
pub const MAX_SCENE_SECONDS: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub text: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_estimate")]
    pub duration_estimate: f64,
}

fn default_tone() -> String {
    "neutral".to_string()
}

fn default_estimate() -> f64 {
    8.0
}

/// Ordered narration scenes. Scene order is fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub scenes: Vec<Scene>,
    pub total_duration: f64,
}

#[derive(Debug, Deserialize)]
struct ScriptRoot {
    #[serde(default)]
    title: String,
    #[serde(default)]
    scenes: Vec<Scene>,
    total_duration: Option<f64>,
}

impl Script {
    /// Parses and cleans a script document. Whitespace is collapsed, empty
    /// scenes are dropped and estimates are clamped to 4..=15 seconds.
    pub fn from_json(text: &str) -> Result<Self> {
        let root: ScriptRoot =
            serde_json::from_str(text).with_context(|| "Failed to parse script JSON")?;

        let scenes: Vec<Scene> = root
            .scenes
            .into_iter()
            .filter_map(|scene| {
                let text = collapse(&scene.text);
                if text.is_empty() {
                    return None;
                }
                let keywords = scene
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                let tone = match scene.tone.trim() {
                    "" => default_tone(),
                    t => t.to_string(),
                };
                let estimate = if scene.duration_estimate.is_finite() {
                    scene.duration_estimate
                } else {
                    default_estimate()
                };
                Some(Scene {
                    text,
                    keywords,
                    tone,
                    duration_estimate: estimate.clamp(MIN_SCENE_SECONDS, MAX_SCENE_SECONDS),
                })
            })
            .collect();

        if scenes.is_empty() {
            return Err(PipelineError::EmptyScript.into());
        }

        let total_duration = root
            .total_duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or_else(|| scenes.iter().map(|s| s.duration_estimate).sum());
        let title = match collapse(&root.title) {
            t if t.is_empty() => "Daily Short".to_string(),
            t => t,
        };

        Ok(Self {
            title,
            scenes,
            total_duration,
        })
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Every keyword in scene order, de-duplicated.
    pub fn all_keywords(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.scenes
            .iter()
            .flat_map(|s| s.keywords.iter())
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect()
    }

    /// File-name friendly form of the title.
    pub fn slug(&self) -> String {
        let mut slug = String::new();
        for ch in self.title.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
            } else if !slug.ends_with('_') && !slug.is_empty() {
                slug.push('_');
            }
            if slug.len() >= 60 {
                break;
            }
        }
        let slug = slug.trim_end_matches('_');
        if slug.is_empty() {
            "short".to_string()
        } else {
            slug.to_string()
        }
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
