use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::text::word_count;
use crate::toolkit::MediaToolkit;

pub const CADENCE_PROVIDER: &str = "synthetic_cadence";

const CADENCE_SECONDS_PER_WORD: f64 = 0.42;
const CADENCE_MIN_SECONDS: f64 = 2.5;
const CADENCE_MAX_SECONDS: f64 = 14.0;

/// One tier of the narration cascade.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Configured and enabled by policy. Unavailable providers are skipped
    /// without an attempt.
    fn is_available(&self) -> bool;

    /// Voices to try in order. Single-voice providers try once.
    fn variants(&self) -> Vec<String> {
        vec![String::new()]
    }

    /// Scored providers keep the best attempt when none reaches the
    /// acceptance threshold; unscored providers take the first valid one.
    fn quality_scored(&self) -> bool {
        false
    }

    /// Whether output is stored under the shared (voice, text) cache key.
    /// Placeholder audio is cached apart so real speech replaces it later.
    fn cacheable(&self) -> bool {
        true
    }

    /// Remote providers are billed per request and show up in the run's
    /// API call counts.
    fn is_remote(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str, variant: &str, out: &Path) -> Result<()>;
}

pub fn cadence_duration(text: &str) -> f64 {
    let words = word_count(text).max(4) as f64;
    (words * CADENCE_SECONDS_PER_WORD).clamp(CADENCE_MIN_SECONDS, CADENCE_MAX_SECONDS)
}

/// Offline speech-like tone. Not lexical; keeps the run moving when every
/// voice is down.
pub struct SyntheticCadence {
    toolkit: Arc<dyn MediaToolkit>,
    enabled: bool,
}

impl SyntheticCadence {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, enabled: bool) -> Self {
        Self { toolkit, enabled }
    }
}

#[async_trait]
impl SpeechProvider for SyntheticCadence {
    fn name(&self) -> &str {
        CADENCE_PROVIDER
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    fn cacheable(&self) -> bool {
        false
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn synthesize(&self, text: &str, _variant: &str, out: &Path) -> Result<()> {
        self.toolkit.render_cadence(cadence_duration(text), out).await
    }
}
