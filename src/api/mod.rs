pub mod elevenlabs;
pub mod gtts;
pub mod pexels;
pub mod pixabay;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::error::{ProviderError, classify_http_error};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(40);

/// One client per run. Request timeouts are set per call.
pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("failed to build reqwest client")
}

/// Sends a request and maps transport errors and non-success statuses into
/// [`ProviderError`].
pub(crate) async fn send_checked(provider: &str, request: RequestBuilder) -> Result<Response> {
    let resp = request
        .send()
        .await
        .map_err(|e| classify_http_error(provider, e))?;
    if !resp.status().is_success() {
        return Err(ProviderError::Rejected {
            provider: provider.to_string(),
            status: resp.status().as_u16(),
        }
        .into());
    }
    Ok(resp)
}

pub(crate) async fn read_bytes(provider: &str, resp: Response) -> Result<Vec<u8>> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ProviderError::network(provider, e))?;
    Ok(bytes.to_vec())
}

/// Downloads `url` into `out`, creating the parent directory.
pub async fn download_to(client: &Client, provider: &str, url: &str, out: &Path) -> Result<()> {
    let resp = send_checked(provider, client.get(url).timeout(DOWNLOAD_TIMEOUT)).await?;
    let bytes = read_bytes(provider, resp).await?;
    if bytes.is_empty() {
        return Err(ProviderError::invalid_output(provider, "empty download body").into());
    }

    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;
    Ok(())
}
