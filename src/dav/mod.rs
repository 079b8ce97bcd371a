/// DAV Client Module
///
/// This module handles all interactions with the release file server over WebDAV.
/// It lists the archives published for a period (PROPFIND) and opens archive downloads (GET).
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use std::time::Duration;

use crate::config::PERIOD_PLACEHOLDER;
use crate::error::{Error, Result};
use crate::models::{Artifact, Period};

/// Listing requests give up after this long
pub const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest response body kept in a transport error
const DIAGNOSTIC_LIMIT: usize = 2048;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getlastmodified/>
    <d:getcontentlength/>
    <d:getcontenttype/>
  </d:prop>
</d:propfind>"#;

/// Lists the archives published for a period
#[async_trait]
pub trait DirectoryLister: Send + Sync {
    fn listing_url(&self, period: Period) -> String;

    async fn list(&self, period: Period) -> Result<Vec<Artifact>>;
}

pub struct DavClient {
    http: Client,
    propfind: Method,
    base_domain: String,
    template: String,
}

impl DavClient {
    /// Create a client for the given base domain and listing URL template
    pub fn new(base_domain: &str, template: &str) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("rfcnpj-loader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        let propfind = Method::from_bytes(b"PROPFIND").map_err(|e| Error::config(e.to_string()))?;

        Ok(Self {
            http,
            propfind,
            base_domain: base_domain.trim_end_matches('/').to_string(),
            template: template.to_string(),
        })
    }

    /// Absolute URL of a listed archive
    pub fn artifact_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{}", self.base_domain, href)
        } else {
            format!("{}/{}", self.base_domain, href)
        }
    }

    /// List the archives at an already-resolved listing URL
    pub async fn list_url(&self, url: &str) -> Result<Vec<Artifact>> {
        tracing::debug!(url, "listing remote directory");

        let response = self
            .http
            .request(self.propfind.clone(), url)
            .header("Depth", "1")
            .header(reqwest::header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .timeout(LIST_TIMEOUT)
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| Error::transport(url, e))?;

        let response = check_status(url, response).await?;
        let body = response.text().await.map_err(|e| Error::transport(url, e))?;

        let artifacts = parse_multistatus(&body).map_err(|e| Error::transport(url, e))?;
        tracing::debug!(url, archives = artifacts.len(), "listing parsed");

        Ok(artifacts)
    }

    /// Start a GET for `url`; non-success statuses become transport errors
    pub async fn fetch(&self, url: &str) -> Result<Response> {
        let response = self.http.get(url).send().await.map_err(|e| Error::transport(url, e))?;

        check_status(url, response).await
    }
}

#[async_trait]
impl DirectoryLister for DavClient {
    fn listing_url(&self, period: Period) -> String {
        self.template.replace(PERIOD_PLACEHOLDER, &period.to_string())
    }

    async fn list(&self, period: Period) -> Result<Vec<Artifact>> {
        let url = self.listing_url(period);
        self.list_url(&url).await
    }
}

async fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::transport(url, format!("unexpected status {}: {}", status, diagnostic(&body))))
}

/// Trimmed body cut to at most 2 KiB on a char boundary
fn diagnostic(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= DIAGNOSTIC_LIMIT {
        return body;
    }

    let mut end = DIAGNOSTIC_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[derive(Debug, Deserialize)]
struct Multistatus {
    #[serde(rename = "response", default)]
    responses: Vec<DavResponse>,
}

#[derive(Debug, Deserialize)]
struct DavResponse {
    href: String,
    #[serde(rename = "propstat", default)]
    propstats: Vec<Propstat>,
}

#[derive(Debug, Deserialize)]
struct Propstat {
    #[serde(default)]
    status: String,
    #[serde(default)]
    prop: Option<Prop>,
}

#[derive(Debug, Default, Deserialize)]
struct Prop {
    #[serde(default)]
    getlastmodified: Option<String>,
    #[serde(default)]
    getcontentlength: Option<String>,
    #[serde(default)]
    getcontenttype: Option<String>,
}

/// Parse a PROPFIND multistatus body into the `.zip` archives it lists.
///
/// Properties come from the first propstat whose status contains `200`.
pub fn parse_multistatus(xml: &str) -> std::result::Result<Vec<Artifact>, quick_xml::DeError> {
    let multistatus: Multistatus = quick_xml::de::from_str(xml)?;

    let artifacts = multistatus
        .responses
        .into_iter()
        .filter_map(|response| {
            let href = response.href.trim().to_string();
            if !href.to_ascii_lowercase().ends_with(".zip") {
                return None;
            }

            let prop = response
                .propstats
                .into_iter()
                .find(|p| p.status.contains("200"))
                .and_then(|p| p.prop)
                .unwrap_or_default();

            Some(Artifact {
                href,
                size: prop.getcontentlength.as_deref().and_then(|s| s.trim().parse().ok()).unwrap_or(0),
                content_type: prop.getcontenttype.unwrap_or_default().trim().to_string(),
                last_modified: prop.getlastmodified.unwrap_or_default().trim().to_string(),
            })
        })
        .collect();

    Ok(artifacts)
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_multistatus() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/2025-08/</d:href>
    <d:propstat><d:prop/><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/2025-08/Simples.ZIP</d:href>
    <d:propstat>
      <d:prop><d:getcontentlength>abc</d:getcontentlength></d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop>
        <d:getcontentlength> 1024 </d:getcontentlength>
        <d:getcontenttype>application/zip</d:getcontenttype>
        <d:getlastmodified>Mon, 01 Sep 2025 10:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/2025-08/LEIAME.pdf</d:href>
    <d:propstat><d:prop><d:getcontentlength>5</d:getcontentlength></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/2025-08/Cnaes.zip</d:href>
    <d:propstat><d:prop><d:getcontentlength>n/a</d:getcontentlength></d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat>
  </d:response>
</d:multistatus>"#;

        let artifacts = parse_multistatus(xml).unwrap();

        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].href, "/dav/2025-08/Simples.ZIP");
        assert_eq!(artifacts[0].size, 1024);
        assert_eq!(artifacts[0].content_type, "application/zip");
        assert_eq!(artifacts[0].last_modified, "Mon, 01 Sep 2025 10:00:00 GMT");
        assert_eq!(artifacts[1].file_name(), "Cnaes.zip");
        assert_eq!(artifacts[1].size, 0);
    }

    #[test]
    fn test_parse_multistatus_rejects_garbage() {
        assert!(parse_multistatus("this is not xml <<<").is_err());
    }

    #[test]
    fn test_urls() {
        let client = DavClient::new("https://files.example.com/", "https://files.example.com/dav/{period}/").unwrap();

        assert_eq!(client.listing_url(period("2025-08")), "https://files.example.com/dav/2025-08/");
        assert_eq!(client.artifact_url("/dav/2025-08/Simples.zip"), "https://files.example.com/dav/2025-08/Simples.zip");
        assert_eq!(client.artifact_url("dav/x.zip"), "https://files.example.com/dav/x.zip");
        assert_eq!(client.artifact_url("http://mirror/x.zip"), "http://mirror/x.zip");
    }

    #[test]
    fn test_diagnostic_is_bounded() {
        let long = "é".repeat(3000);
        let cut = diagnostic(&long);
        assert!(cut.len() <= DIAGNOSTIC_LIMIT);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(diagnostic("  short  "), "short");
    }

    #[tokio::test]
    async fn test_list_sends_propfind() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .and(path("/dav/2025-08"))
            .and(header("Depth", "1"))
            .respond_with(
                ResponseTemplate::new(207)
                    .set_body_string(fixtures::multistatus(&[("/dav/2025-08/Simples.zip", 42), ("/dav/2025-08/Socios0.zip", 7)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = DavClient::new(&server.uri(), &format!("{}/dav/{{period}}", server.uri())).unwrap();
        let artifacts = client.list(period("2025-08")).await.unwrap();

        let names: Vec<&str> = artifacts.iter().map(|a| a.file_name()).collect();
        assert_eq!(names, vec!["Simples.zip", "Socios0.zip"]);
        assert_eq!(artifacts[0].size, 42);
    }

    #[tokio::test]
    async fn test_list_not_found_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("PROPFIND"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such period"))
            .mount(&server)
            .await;

        let client = DavClient::new(&server.uri(), &format!("{}/dav/{{period}}", server.uri())).unwrap();
        let err = client.list(period("2030-01")).await.unwrap_err();

        match err {
            Error::Transport { url, message } => {
                assert!(url.ends_with("/dav/2030-01"));
                assert!(message.contains("404"));
                assert!(message.contains("no such period"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
