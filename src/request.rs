//! Request descriptors and the document source seam
//!
//! The engine never performs I/O. Stages describe the page they need; a
//! caller-supplied [`DocumentSource`] turns a prepared request into a
//! parsed document.

use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// What a stage expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Document,
    Json,
}

/// A request as written in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    /// Path relative to the site base URL (or an absolute URL).
    pub url: String,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl RequestDescriptor {
    pub fn document(url: &str) -> Self {
        Self {
            url: url.to_string(),
            response_type: ResponseType::Document,
            params: BTreeMap::new(),
        }
    }
}

/// A request ready for the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: Url,
    pub response_type: ResponseType,
    pub headers: Vec<(String, String)>,
    /// How long the transport should wait before sending.
    pub delay: Duration,
}

/// Base URL and headers shared by every request to one site.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: Url,
    headers: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        // Keep the last path segment when joining relative paths
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            headers: Vec::new(),
        })
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve the descriptor against the base URL and encode its
    /// parameters plus `extra` (which win on conflict).
    pub fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        extra: &BTreeMap<String, String>,
    ) -> Result<PreparedRequest> {
        let path = descriptor.url.trim_start_matches('/');
        let mut url = self.base_url.join(path)?;

        let mut params = descriptor.params.clone();
        params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &params {
                pairs.append_pair(k, v);
            }
        }

        Ok(PreparedRequest {
            url,
            response_type: descriptor.response_type,
            headers: self.headers.clone(),
            delay: Duration::ZERO,
        })
    }
}

/// Supplies parsed documents for prepared requests.
///
/// Implementations own transport, rate limiting and retries. Closures of
/// the right shape implement it directly.
pub trait DocumentSource {
    fn fetch(&self, request: &PreparedRequest) -> Result<Html>;
}

impl<F> DocumentSource for F
where
    F: Fn(&PreparedRequest) -> Result<Html>,
{
    fn fetch(&self, request: &PreparedRequest) -> Result<Html> {
        self(request)
    }
}

/// Serves fixed HTML keyed by URL path, for offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticPages {
    pages: BTreeMap<String, String>,
}

impl StaticPages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, path: &str, html: &str) -> Self {
        self.pages.insert(path.to_string(), html.to_string());
        self
    }
}

impl DocumentSource for StaticPages {
    fn fetch(&self, request: &PreparedRequest) -> Result<Html> {
        self.pages
            .get(request.url.path())
            .map(|html| Html::parse_document(html))
            .ok_or_else(|| Error::Fetch {
                url: request.url.to_string(),
                reason: "no such page".to_string(),
            })
    }
}
