use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::cache::file_size;
use crate::error::ProviderError;
use crate::narration::SpeechProvider;
use crate::text::Language;
use crate::toolkit::MediaToolkit;

pub const PROVIDER: &str = "os_voice";

const MIN_RAW_BYTES: u64 = 4096;

/// The operating system's own speech synthesizer: `say` on macOS,
/// `espeak-ng` elsewhere. Raw output is transcoded to MP3.
pub struct LocalVoice {
    toolkit: Arc<dyn MediaToolkit>,
    language: Language,
    enabled: bool,
}

impl LocalVoice {
    pub fn new(toolkit: Arc<dyn MediaToolkit>, language: Language, enabled: bool) -> Self {
        Self {
            toolkit,
            language,
            enabled,
        }
    }

    fn voices(&self) -> &'static [&'static str] {
        if cfg!(target_os = "macos") {
            match self.language {
                Language::English => &["Samantha", "Ava", "Daniel"],
                Language::Hindi => &["Aman", "Aditi", "Rishi", "Samantha"],
            }
        } else {
            match self.language {
                Language::English => &["en"],
                Language::Hindi => &["hi", "en"],
            }
        }
    }

    fn command(&self, voice: &str, raw: &Path, text: &str) -> Command {
        let mut cmd = if cfg!(target_os = "macos") {
            let mut cmd = Command::new("say");
            cmd.arg("-v").arg(voice).arg("-o").arg(raw);
            cmd
        } else {
            let mut cmd = Command::new("espeak-ng");
            cmd.arg("-v").arg(voice).arg("-w").arg(raw);
            cmd
        };
        cmd.arg(text);
        cmd
    }
}

#[async_trait]
impl SpeechProvider for LocalVoice {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn synthesize(&self, text: &str, _variant: &str, out: &Path) -> Result<()> {
        let suffix = if cfg!(target_os = "macos") { ".aiff" } else { ".wav" };
        let raw = tempfile::Builder::new()
            .prefix("narration_")
            .suffix(suffix)
            .tempfile()
            .context("failed to create temp file for OS voice")?;

        let mut produced = false;
        for voice in self.voices() {
            let status = match self.command(voice, raw.path(), text).output().await {
                Ok(output) => output.status,
                Err(err) => {
                    return Err(ProviderError::unavailable(PROVIDER, err.to_string()).into());
                }
            };
            let size = file_size(raw.path()).await.unwrap_or(0);
            if status.success() && size > MIN_RAW_BYTES {
                produced = true;
                break;
            }
            debug!("OS voice '{}' produced no usable audio", voice);
        }
        if !produced {
            return Err(ProviderError::invalid_output(PROVIDER, "no voice produced audio").into());
        }

        self.toolkit.transcode_audio(raw.path(), out).await
    }
}
