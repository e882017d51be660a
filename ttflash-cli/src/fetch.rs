//! Fetching preset files.
//!
//! `http`/`https` URLs are downloaded; `file` URLs are read from disk so a
//! preset can point at a local build directory.

use anyhow::{Context, Result, bail};
use log::debug;
use reqwest::blocking::Client;
use std::fs;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads preset files, reusing one HTTP connection pool.
pub(crate) struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Create a fetcher with the default timeouts.
    pub(crate) fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .user_agent(concat!("ttflash/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch the contents of `url`.
    pub(crate) fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        debug!("Fetching {url}");
        match url.scheme() {
            "file" => read_file_url(url),
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .with_context(|| format!("Failed to download {url}"))?;
                let status = response.status();
                if !status.is_success() {
                    bail!("Failed to download {url}: HTTP {status}");
                }
                let body = response
                    .bytes()
                    .with_context(|| format!("Failed to download {url}"))?;
                Ok(body.to_vec())
            },
            other => bail!("Unsupported URL scheme '{other}' in {url}"),
        }
    }
}

fn read_file_url(url: &Url) -> Result<Vec<u8>> {
    let Ok(path) = url.to_file_path() else {
        bail!("Not a local file path: {url}");
    };
    fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_urls_are_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        fs::write(&path, [1u8, 2, 3]).unwrap();

        let fetcher = Fetcher::new().unwrap();
        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(fetcher.fetch(&url).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.bin")).unwrap();
        let err = Fetcher::new().unwrap().fetch(&url).unwrap_err();
        assert!(format!("{err:#}").contains("missing.bin"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/image.bin").unwrap();
        assert!(Fetcher::new().unwrap().fetch(&url).is_err());
    }
}
