use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::path::Path;

use crate::api::{SEARCH_TIMEOUT, download_to, send_checked};
use crate::error::ProviderError;
use crate::visual::{AssetKind, StockCandidate, StockProvider};

pub const PROVIDER: &str = "pexels";

#[derive(Debug, Default, Deserialize)]
struct VideoPage {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    id: u64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    video_files: Vec<VideoFile>,
}

#[derive(Debug, Deserialize)]
struct User {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct VideoFile {
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PhotoPage {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    id: u64,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    photographer: Option<String>,
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    #[serde(default)]
    original: Option<String>,
}

/// mp4 renditions only, smallest pixel area first so the first viable
/// rendition is the cheapest download.
pub fn parse_videos(body: &str) -> Result<Vec<StockCandidate>> {
    let page: VideoPage = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_output(PROVIDER, e.to_string()))?;

    let mut out = Vec::new();
    for video in page.videos {
        let mut files: Vec<(String, u32, u32)> = video
            .video_files
            .into_iter()
            .filter(|f| f.file_type.as_deref() == Some("video/mp4"))
            .filter_map(|f| Some((f.link?, f.width.unwrap_or(0), f.height.unwrap_or(0))))
            .collect();
        files.sort_by_key(|(_, w, h)| u64::from(*w) * u64::from(*h));

        let attribution = video
            .user
            .as_ref()
            .map(|u| format!("{} on Pexels", u.name));
        for (link, width, height) in files {
            out.push(StockCandidate {
                provider: PROVIDER.to_string(),
                remote_id: video.id.to_string(),
                kind: AssetKind::Video,
                url: link,
                width,
                height,
                page_url: video.url.clone(),
                attribution: attribution.clone(),
            });
        }
    }
    Ok(out)
}

pub fn parse_photos(body: &str) -> Result<Vec<StockCandidate>> {
    let page: PhotoPage = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_output(PROVIDER, e.to_string()))?;

    Ok(page
        .photos
        .into_iter()
        .filter_map(|photo| {
            Some(StockCandidate {
                provider: PROVIDER.to_string(),
                remote_id: photo.id.to_string(),
                kind: AssetKind::Image,
                url: photo.src.original?,
                width: photo.width,
                height: photo.height,
                page_url: photo.url,
                attribution: photo.photographer.map(|p| format!("{} on Pexels", p)),
            })
        })
        .collect())
}

pub struct Pexels {
    client: Client,
    api_key: String,
}

impl Pexels {
    pub fn new(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl StockProvider for Pexels {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn search(&self, query: &str, kind: AssetKind) -> Result<Vec<StockCandidate>> {
        let endpoint = match kind {
            AssetKind::Video => "https://api.pexels.com/videos/search",
            AssetKind::Image => "https://api.pexels.com/v1/search",
            AssetKind::Synthetic => return Ok(Vec::new()),
        };
        let url = Url::parse_with_params(
            endpoint,
            &[("query", query), ("per_page", "10"), ("orientation", "portrait")],
        )
        .context("failed to build Pexels URL")?;

        let request = self
            .client
            .get(url)
            .header("Authorization", &self.api_key)
            .timeout(SEARCH_TIMEOUT);
        let resp = send_checked(PROVIDER, request).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        match kind {
            AssetKind::Video => parse_videos(&body),
            _ => parse_photos(&body),
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
    fn keeps_mp4_files_sorted_by_area() {
        let body = r#"{"videos": [{
            "id": 77, "url": "https://www.pexels.com/video/77/",
            "user": {"name": "Asha"},
            "video_files": [
                {"file_type": "video/mp4", "width": 1440, "height": 2560, "link": "https://v/hd"},
                {"file_type": "video/webm", "width": 720, "height": 1280, "link": "https://v/webm"},
                {"file_type": "video/mp4", "width": 720, "height": 1280, "link": "https://v/sd"},
                {"file_type": "video/mp4", "width": 360, "height": 640}
            ]
        }]}"#;
        let candidates = parse_videos(body).unwrap();
        let urls: Vec<_> = candidates.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(urls, vec!["https://v/sd", "https://v/hd"]);
        assert_eq!(candidates[0].remote_id, "77");
        assert_eq!(candidates[0].attribution.as_deref(), Some("Asha on Pexels"));
        assert_eq!(candidates[0].cooldown_key(), "pexels:video:77");
    }

    #[test]
    fn photos_use_original_source() {
        let body = r#"{"photos": [
            {"id": 5, "width": 3000, "height": 4500, "photographer": "Ravi",
             "src": {"original": "https://p/5.jpeg"}},
            {"id": 6, "width": 3000, "height": 4500, "src": {}}
        ]}"#;
        let candidates = parse_photos(body).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, AssetKind::Image);
        assert_eq!(candidates[0].height, 4500);
    }

    #[test]
    fn malformed_body_is_invalid_output() {
        let err = parse_videos("<html>").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::InvalidOutput { .. })
        ));
    }
}
