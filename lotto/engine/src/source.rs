use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Location of a frozen artifact (feature document or serialized model).
///
/// Strings starting with `http://` or `https://` are remote; everything else is a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ArtifactSource {
    /// Local file.
    Path(PathBuf),
    /// Remote document fetched with a GET request.
    Url(String),
}

impl ArtifactSource {
    /// Returns `true` for HTTP(S) sources.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Url(_))
    }

    /// Anchors a relative path at `base`; absolute paths and URLs are unchanged.
    #[must_use]
    pub fn resolve_relative_to(&self, base: &Path) -> Self {
        match self {
            Self::Path(path) if path.is_relative() => Self::Path(base.join(path)),
            other => other.clone(),
        }
    }
}

impl From<String> for ArtifactSource {
    fn from(value: String) -> Self {
        let trimmed = value.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }
}

impl From<&str> for ArtifactSource {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<ArtifactSource> for String {
    fn from(value: ArtifactSource) -> Self {
        match value {
            ArtifactSource::Path(path) => path.to_string_lossy().into_owned(),
            ArtifactSource::Url(url) => url,
        }
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Retrieves raw artifact bytes.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Fetches the full contents of `source`.
    async fn fetch(&self, source: &ArtifactSource) -> Result<Vec<u8>>;
}

/// Fetcher reading local files with tokio and remote ones with `reqwest`.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: Client,
    timeout: Duration,
}

impl DefaultFetcher {
    /// Creates a fetcher whose HTTP requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("lotto-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl ArtifactFetcher for DefaultFetcher {
    async fn fetch(&self, source: &ArtifactSource) -> Result<Vec<u8>> {
        match source {
            ArtifactSource::Path(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display())),
            ArtifactSource::Url(url) => {
                let response = self
                    .client
                    .get(url)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .with_context(|| format!("requesting {url}"))?
                    .error_for_status()
                    .with_context(|| format!("bad status from {url}"))?;
                let body = response
                    .bytes()
                    .await
                    .with_context(|| format!("reading body of {url}"))?;
                Ok(body.to_vec())
            }
        }
    }
}
