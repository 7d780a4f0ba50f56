use serde::Serialize;

use crate::cache::{content_key, content_seed};

/// Parameters for a locally generated scene visual. A pure function of
/// (scene text, scene index), so reruns reproduce the same clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntheticVisual {
    pub key: String,
    pub hue: u32,
    pub saturation: f64,
    pub brightness: f64,
    pub box_offset: u32,
    pub duration: f64,
}

impl SyntheticVisual {
    pub fn for_scene(text: &str, index: usize, duration: f64) -> Self {
        let index_part = index.to_string();
        let parts = ["synthetic", text, index_part.as_str()];
        let seed = content_seed(&parts);
        let index = index as u64;

        // The box offset grows by at least one step per index, so two scenes
        // never share a frame pattern even with identical text.
        let hue = ((index * 38 + seed % 29) % 360) as u32;
        let saturation = 0.52 + ((seed >> 8) % 4) as f64 * 0.08;
        let brightness = -0.03 + ((seed >> 16) % 3) as f64 * 0.02;
        let box_offset = (index * 37 + (seed >> 24) % 37) as u32;

        Self {
            key: content_key(&parts),
            hue,
            saturation,
            brightness,
            box_offset,
            duration,
        }
    }

    pub fn cooldown_key(&self) -> String {
        format!("synthetic:{}", self.key)
    }
}
