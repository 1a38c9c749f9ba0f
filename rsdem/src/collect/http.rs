//! Blocking HTTP plumbing shared by the STAC client and the DEM fetchers.
//!
//! Every network call goes through [`HttpTransport`], so fetchers can be
//! driven by a scripted transport in tests.

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{ElevError, Result};

#[cfg(feature = "indicatif")]
use indicatif::{ProgressBar, ProgressStyle};

#[cfg(feature = "indicatif")]
fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>10}/{total_bytes:10} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

pub type Headers = BTreeMap<String, String>;

/// Blocking HTTP operations used by this crate.
pub trait HttpTransport {
    /// POST a JSON body and parse the JSON response.
    fn post_json(&self, url: &str, headers: &Headers, body: &Value) -> Result<Value>;

    /// GET with query parameters and parse the JSON response.
    fn get_json(&self, url: &str, headers: &Headers, query: &[(String, String)]) -> Result<Value>;

    /// GET with query parameters and stream the body into `sink`.
    /// Returns the number of bytes written.
    fn download<W: Write>(
        &self,
        url: &str,
        query: &[(String, String)],
        sink: &mut W,
    ) -> Result<u64>;
}

/// [`HttpTransport`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("rsdem/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ReqwestTransport { client })
    }

    pub fn with_client(client: Client) -> Self {
        ReqwestTransport { client }
    }

    fn send(url: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .map_err(|e| ElevError::upstream(url, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(ElevError::upstream(
                url,
                format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(500).collect::<String>()
                ),
            ));
        }

        Ok(response)
    }

    fn read_json(url: &str, response: Response) -> Result<Value> {
        let text = response
            .text()
            .map_err(|e| ElevError::upstream(url, format!("reading response body: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| ElevError::upstream(url, format!("invalid JSON body: {e}")))
    }

    fn with_headers(mut request: RequestBuilder, headers: &Headers) -> RequestBuilder {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(&self, url: &str, headers: &Headers, body: &Value) -> Result<Value> {
        let request = Self::with_headers(self.client.post(url), headers).json(body);
        let response = Self::send(url, request)?;
        Self::read_json(url, response)
    }

    fn get_json(&self, url: &str, headers: &Headers, query: &[(String, String)]) -> Result<Value> {
        let request = Self::with_headers(self.client.get(url), headers).query(query);
        let response = Self::send(url, request)?;
        Self::read_json(url, response)
    }

    fn download<W: Write>(
        &self,
        url: &str,
        query: &[(String, String)],
        sink: &mut W,
    ) -> Result<u64> {
        let mut response = Self::send(url, self.client.get(url).query(query))?;

        #[cfg(feature = "indicatif")]
        let written = {
            let pb = match response.content_length() {
                Some(len) => ProgressBar::new(len),
                None => ProgressBar::new_spinner(),
            };
            pb.set_style(progress_style());
            pb.set_message("Downloading");
            let mut writer = pb.wrap_write(&mut *sink);
            let written = std::io::copy(&mut response, &mut writer)?;
            pb.finish_and_clear();
            written
        };

        #[cfg(not(feature = "indicatif"))]
        let written = std::io::copy(&mut response, sink)?;

        Ok(written)
    }
}

/// Stream a GET response into `path`.
///
/// The body goes to a temporary file next to `path` which is renamed into
/// place only once the transfer completed, so a failed download never leaves
/// a truncated file behind.
pub fn download_to_file<T: HttpTransport>(
    transport: &T,
    url: &str,
    query: &[(String, String)],
    path: &Path,
) -> Result<u64> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    let written = {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        let written = transport.download(url, query, &mut writer)?;
        writer.flush()?;
        written
    };

    tmp.persist(path).map_err(|e| ElevError::Io(e.error))?;
    tracing::debug!(url, bytes = written, path = %path.display(), "download complete");
    Ok(written)
}


#[cfg(test)]
mod tests {
    use super::testing::{MockResponse, MockTransport};
    use super::*;

    #[test]
    fn test_download_to_file_persists_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dem.tif");
        let transport = MockTransport::new();
        transport.respond("https://example.com/dem", MockResponse::Bytes(vec![1, 2, 3, 4]));

        let written = download_to_file(&transport, "https://example.com/dem", &[], &path).unwrap();

        assert_eq!(written, 4);
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let transport = MockTransport::new();
        transport.respond("https://example.com/dem", MockResponse::Status(500));

        let err = download_to_file(&transport, "https://example.com/dem", &[], &path).unwrap_err();

        assert!(matches!(err, ElevError::Upstream { .. }));
        assert!(!path.exists());
        // the temporary file is cleaned up as well
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
