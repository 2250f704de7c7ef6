//! Avatar image acquisition for freshly provisioned accounts

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::AvatarConfig;
use crate::error::{RemoteError, Result, StoreError};

/// Where a new account's avatar comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarSource {
    /// Ask the face generator, if one is configured
    None,
    /// Download from a URL
    Url(String),
    /// File name inside the media directory
    Media(String),
}

impl AvatarSource {
    /// Interpret a roster `avatar` value
    pub fn from_spec(spec: Option<&str>) -> Self {
        match spec {
            None => AvatarSource::None,
            Some(s) if s.trim().is_empty() => AvatarSource::None,
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => {
                AvatarSource::Url(s.to_string())
            }
            Some(s) => AvatarSource::Media(s.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct GeneratedFace {
    generated: serde_json::Value,
    src: String,
}

/// Turns an [`AvatarSource`] into a local image file
pub struct AvatarFetcher {
    http: reqwest::Client,
    media_dir: PathBuf,
    generator_url: Option<String>,
    gender: String,
}

impl AvatarFetcher {
    pub fn new(config: &AvatarConfig, media_dir: PathBuf, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            media_dir,
            generator_url: config
                .generator_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            gender: config.gender.clone(),
        })
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Local file to upload as `username`'s avatar, if any
    pub async fn resolve(&self, username: &str, source: &AvatarSource) -> Result<Option<PathBuf>> {
        match source {
            AvatarSource::Media(name) => {
                let path = self.media_dir.join(name);
                if path.is_file() {
                    Ok(Some(path))
                } else {
                    tracing::warn!(username, path = %path.display(), "Avatar file missing, skipping");
                    Ok(None)
                }
            }
            AvatarSource::Url(url) => {
                let path = self.download(url, username).await?;
                Ok(Some(path))
            }
            AvatarSource::None => match &self.generator_url {
                Some(generator) => {
                    let url = self.generate(generator).await?;
                    let path = self.download(&url, username).await?;
                    Ok(Some(path))
                }
                None => Ok(None),
            },
        }
    }

    /// Ask the face generator for a new image and return its URL
    async fn generate(&self, generator: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/new", generator))
            .query(&[
                ("gender", self.gender.as_str()),
                ("age", "all"),
                ("etnic", "all"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RemoteError::Unavailable(format!("Avatar generator failed: {}", e)))?;

        let face: GeneratedFace = response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Avatar generator reply: {}", e)))?;

        if face.generated.as_bool() == Some(false) || face.generated.as_str() == Some("false") {
            return Err(RemoteError::Unavailable("Avatar generator produced no image".to_string()).into());
        }
        Ok(format!("{}{}", generator, face.src))
    }

    async fn download(&self, url: &str, username: &str) -> Result<PathBuf> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RemoteError::Unavailable(format!("Avatar download from {} failed: {}", url, e)))?
            .bytes()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("Avatar download from {} failed: {}", url, e)))?;

        tokio::fs::create_dir_all(&self.media_dir)
            .await
            .map_err(StoreError::Io)?;
        let path = self.media_dir.join(format!("{}.png", username));
        tokio::fs::write(&path, &bytes).await.map_err(StoreError::Io)?;

        tracing::debug!(username, path = %path.display(), size = bytes.len(), "Avatar downloaded");
        Ok(path)
    }
}
