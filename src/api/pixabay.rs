use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::api::{SEARCH_TIMEOUT, download_to, send_checked};
use crate::error::ProviderError;
use crate::visual::{AssetKind, StockCandidate, StockProvider};

pub const PROVIDER: &str = "pixabay";

const VARIANT_ORDER: [&str; 4] = ["large", "medium", "small", "tiny"];
const LARGE_IMAGE_EDGE: u32 = 1280;

#[derive(Debug, Default, Deserialize)]
struct VideoPage {
    #[serde(default)]
    hits: Vec<VideoHit>,
}

#[derive(Debug, Deserialize)]
struct VideoHit {
    id: u64,
    #[serde(default, rename = "pageURL")]
    page_url: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    videos: BTreeMap<String, Variant>,
}

#[derive(Debug, Deserialize)]
struct Variant {
    #[serde(default)]
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ImagePage {
    #[serde(default)]
    hits: Vec<ImageHit>,
}

#[derive(Debug, Deserialize)]
struct ImageHit {
    id: u64,
    #[serde(default, rename = "pageURL")]
    page_url: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default, rename = "largeImageURL")]
    large_image_url: Option<String>,
    #[serde(default, rename = "imageWidth")]
    image_width: u32,
    #[serde(default, rename = "imageHeight")]
    image_height: u32,
}

fn attribution(user: Option<&str>) -> Option<String> {
    user.filter(|u| !u.is_empty())
        .map(|u| format!("{} on Pixabay", u))
}

/// Variants in large -> tiny order per hit.
pub fn parse_videos(body: &str) -> Result<Vec<StockCandidate>> {
    let page: VideoPage = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_output(PROVIDER, e.to_string()))?;

    let mut out = Vec::new();
    for hit in page.hits {
        for name in VARIANT_ORDER {
            let Some(variant) = hit.videos.get(name) else {
                continue;
            };
            if variant.url.is_empty() {
                continue;
            }
            out.push(StockCandidate {
                provider: PROVIDER.to_string(),
                remote_id: hit.id.to_string(),
                kind: AssetKind::Video,
                url: variant.url.clone(),
                width: variant.width,
                height: variant.height,
                page_url: hit.page_url.clone(),
                attribution: attribution(hit.user.as_deref()),
            });
        }
    }
    Ok(out)
}

/// `largeImageURL` is capped at 1280px on its long edge; report the
/// dimensions of that rendition, not the original.
pub fn parse_images(body: &str) -> Result<Vec<StockCandidate>> {
    let page: ImagePage = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_output(PROVIDER, e.to_string()))?;

    Ok(page
        .hits
        .into_iter()
        .filter_map(|hit| {
            let (width, height) = scaled(hit.image_width, hit.image_height, LARGE_IMAGE_EDGE);
            Some(StockCandidate {
                provider: PROVIDER.to_string(),
                remote_id: hit.id.to_string(),
                kind: AssetKind::Image,
                url: hit.large_image_url.filter(|u| !u.is_empty())?,
                width,
                height,
                page_url: hit.page_url,
                attribution: attribution(hit.user.as_deref()),
            })
        })
        .collect())
}

fn scaled(width: u32, height: u32, edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= edge || longest == 0 {
        return (width, height);
    }
    let factor = f64::from(edge) / f64::from(longest);
    (
        (f64::from(width) * factor).round() as u32,
        (f64::from(height) * factor).round() as u32,
    )
}

pub struct Pixabay {
    client: Client,
    api_key: String,
}

impl Pixabay {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl StockProvider for Pixabay {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn search(&self, query: &str, kind: AssetKind) -> Result<Vec<StockCandidate>> {
        let url = match kind {
            AssetKind::Video => Url::parse_with_params(
                "https://pixabay.com/api/videos/",
                &[
                    ("key", self.api_key.as_str()),
                    ("q", query),
                    ("per_page", "10"),
                    ("safesearch", "true"),
                ],
            ),
            AssetKind::Image => Url::parse_with_params(
                "https://pixabay.com/api/",
                &[
                    ("key", self.api_key.as_str()),
                    ("q", query),
                    ("image_type", "photo"),
                    ("orientation", "vertical"),
                    ("per_page", "10"),
                    ("safesearch", "true"),
                ],
            ),
            AssetKind::Synthetic => return Ok(Vec::new()),
        }
        .context("failed to build Pixabay URL")?;

        let resp = send_checked(PROVIDER, self.client.get(url).timeout(SEARCH_TIMEOUT)).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        match kind {
            AssetKind::Video => parse_videos(&body),
            _ => parse_images(&body),
        }
    }

    async fn download(&self, candidate: &StockCandidate, out: &Path) -> Result<()> {
        download_to(&self.client, PROVIDER, &candidate.url, out).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_variants_large_to_tiny() {
        let body = r#"{"hits": [{
            "id": 9, "pageURL": "https://pixabay.com/videos/id-9/", "user": "kiran",
            "videos": {
                "tiny": {"url": "https://x/tiny.mp4", "width": 540, "height": 960},
                "large": {"url": "", "width": 0, "height": 0},
                "medium": {"url": "https://x/medium.mp4", "width": 1080, "height": 1920}
            }
        }]}"#;
        let candidates = parse_videos(body).unwrap();
        let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://x/medium.mp4", "https://x/tiny.mp4"]);
        assert_eq!(candidates[0].attribution.as_deref(), Some("kiran on Pixabay"));
        assert_eq!(candidates[0].cooldown_key(), "pixabay:video:9");
    }

    #[test]
    fn images_report_rendition_size() {
        let body = r#"{"hits": [{"id": 3, "largeImageURL": "https://x/3.jpg",
            "imageWidth": 3000, "imageHeight": 6000}]}"#;
        let candidates = parse_images(body).unwrap();
        assert_eq!((candidates[0].width, candidates[0].height), (640, 1280));
        assert_eq!(scaled(700, 1000, 1280), (700, 1000));
    }
}
