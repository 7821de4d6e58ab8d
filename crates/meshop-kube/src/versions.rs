//! Fetching the upgrade compatibility map

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use meshop_core::VersionsMap;

use crate::error::{KubeError, Result};

pub const DEFAULT_VERSIONS_URL: &str = "https://raw.githubusercontent.com/istio/operator/master/version/versions.yaml";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait RemoteDocumentFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches `http(s)://` URLs, and reads `file://` URLs and plain paths from disk
pub struct DefaultFetcher {
    http: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| KubeError::Fetch {
                url: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RemoteDocumentFetcher for DefaultFetcher {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let fetch_err = |message: String| KubeError::Fetch {
            url: url.to_string(),
            message,
        };

        let parsed = match Url::parse(url) {
            Ok(u) => u,
            // Not a URL: a local path
            Err(_) => return Ok(tokio::fs::read(url).await.map_err(|e| fetch_err(e.to_string()))?),
        };
        match parsed.scheme() {
            "http" | "https" => {
                let resp = self
                    .http
                    .get(parsed)
                    .send()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                if !resp.status().is_success() {
                    return Err(fetch_err(format!("HTTP {}", resp.status())));
                }
                let body = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
                Ok(body.to_vec())
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| fetch_err("not a local file path".into()))?;
                tokio::fs::read(path).await.map_err(|e| fetch_err(e.to_string()))
            }
            other => Err(fetch_err(format!("unsupported scheme {}", other))),
        }
    }
}

/// Load the versions map from `url`, falling back to the compiled-in map when
/// it cannot be fetched or parsed
pub async fn load_versions_map(fetcher: &dyn RemoteDocumentFetcher, url: &str) -> Result<VersionsMap> {
    let fetched = match fetcher.get(url).await {
        Ok(bytes) => String::from_utf8(bytes)
            .map_err(|e| e.to_string())
            .and_then(|s| VersionsMap::from_yaml(&s).map_err(|e| e.to_string())),
        Err(e) => Err(e.to_string()),
    };
    match fetched {
        Ok(map) => {
            debug!(url, entries = map.0.len(), "loaded versions map");
            Ok(map)
        }
        Err(e) => {
            warn!(url, error = %e, "failed to load versions map, using the builtin one");
            Ok(VersionsMap::builtin()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAP: &str = "- operatorVersion: 9.9.0\n  supportedIstioVersions: \">=9.8.0, <9.9.0\"\n  recommendedIstioVersions: 9.9.0\n";

    #[tokio::test]
    async fn test_fetch_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/version/versions.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(MAP))
            .mount(&server)
            .await;

        let fetcher = DefaultFetcher::new().unwrap();
        let url = format!("{}/version/versions.yaml", server.uri());
        let map = load_versions_map(&fetcher, &url).await.unwrap();
        assert!(map.find(&Version::new(9, 9, 0)).is_some());
    }

    #[tokio::test]
    async fn test_http_error_falls_back_to_builtin() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = DefaultFetcher::new().unwrap();
        let map = load_versions_map(&fetcher, &server.uri()).await.unwrap();
        assert_eq!(map, VersionsMap::builtin().unwrap());
    }

    #[tokio::test]
    async fn test_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("versions.yaml");
        std::fs::write(&file, MAP).unwrap();

        let fetcher = DefaultFetcher::new().unwrap();
        let map = load_versions_map(&fetcher, file.to_str().unwrap()).await.unwrap();
        assert_eq!(map.0.len(), 1);
    }
}
