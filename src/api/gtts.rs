use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::api::{read_bytes, send_checked};
use crate::error::ProviderError;
use crate::narration::SpeechProvider;
use crate::text::Language;

pub const PROVIDER: &str = "network_voice";

const ENDPOINT: &str = "https://translate.google.com/translate_tts";
const MAX_CHUNK_CHARS: usize = 180;

/// Neutral network voice. Long text is fetched in chunks and the MP3
/// payloads are appended; MP3 frames concatenate cleanly.
pub struct NetworkVoice {
    client: Client,
    language: Language,
    enabled: bool,
}

impl NetworkVoice {
    pub fn new(client: Client, language: Language, enabled: bool) -> Self {
        Self {
            client,
            language,
            enabled,
        }
    }
}

/// Splits on word boundaries into chunks of at most `max_chars` characters.
/// A single longer word is hard-split.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        let needed = if current.is_empty() {
            word_len
        } else {
            current.chars().count() + 1 + word_len
        };
        if needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl SpeechProvider for NetworkVoice {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn synthesize(&self, text: &str, _variant: &str, out: &Path) -> Result<()> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(ProviderError::invalid_output(PROVIDER, "nothing to speak").into());
        }

        let mut audio = Vec::new();
        let total = chunks.len().to_string();
        for (idx, chunk) in chunks.iter().enumerate() {
            let idx = idx.to_string();
            let url = Url::parse_with_params(
                ENDPOINT,
                &[
                    ("ie", "UTF-8"),
                    ("q", chunk.as_str()),
                    ("tl", self.language.code()),
                    ("client", "tw-ob"),
                    ("total", total.as_str()),
                    ("idx", idx.as_str()),
                ],
            )
            .context("failed to build network voice URL")?;
            let request = self.client.get(url).timeout(Duration::from_secs(30));
            let resp = send_checked(PROVIDER, request).await?;
            audio.extend(read_bytes(PROVIDER, resp).await?);
        }

        if audio.is_empty() {
            return Err(ProviderError::invalid_output(PROVIDER, "empty audio body").into());
        }
        fs::write(out, &audio)
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        Ok(())
    }
}
