use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::api::{read_bytes, send_checked};
use crate::config::Config;
use crate::error::ProviderError;
use crate::narration::SpeechProvider;

pub const PROVIDER: &str = "elevenlabs";

/// Premium cloud voice. Each configured voice id is one scored attempt.
pub struct ElevenLabs {
    client: Client,
    api_key: String,
    model_id: String,
    voice_ids: Vec<String>,
}

impl ElevenLabs {
    pub fn new(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_key: cfg.elevenlabs_key.clone(),
            model_id: cfg.voice.model_id.clone(),
            voice_ids: cfg
                .voice
                .voice_ids
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl SpeechProvider for ElevenLabs {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.voice_ids.is_empty()
    }

    fn variants(&self) -> Vec<String> {
        self.voice_ids.clone()
    }

    fn quality_scored(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str, variant: &str, out: &Path) -> Result<()> {
        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
            variant
        );

        let body = serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": 0.45,
                "similarity_boost": 0.8,
            },
        });

        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(Duration::from_secs(90));
        let resp = send_checked(PROVIDER, request).await?;
        let bytes = read_bytes(PROVIDER, resp).await?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_output(PROVIDER, "empty audio body").into());
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        fs::write(out, &bytes).await?;
        Ok(())
    }
}
