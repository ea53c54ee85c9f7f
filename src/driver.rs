//! Site drivers
//!
//! A [`Driver`] composes the generic detail-page parser with pluggable
//! capabilities. Sites replace only the capability that differs (discount
//! detection, id extraction) and inherit everything else.

use chrono::FixedOffset;
use scraper::Html;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::detail::{DetailParser, TorrentItem};
use crate::discount::{DiscountResult, DiscountStrategy};
use crate::error::{Error, Result};
use crate::filters::query_param;
use crate::listing::{ListParser, TorrentRow};
use crate::request::{DocumentSource, Endpoint, PreparedRequest, RequestDescriptor};
use crate::schema::ExtractionSchema;
use crate::site::{SiteDefinition, UserInfo};

const DETAILS_PATH: &str = "details.php";

/// Maps a torrent link to its id.
pub trait IdStrategy: Send + Sync + fmt::Debug {
    fn torrent_id(&self, link: &str) -> Option<String>;
}

/// Reads the `id` query parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParamId;

impl IdStrategy for QueryParamId {
    fn torrent_id(&self, link: &str) -> Option<String> {
        query_param(link, "id")
    }
}

/// Takes whatever follows the first `id=` up to the next `&`, without
/// parsing the link as a URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkSplitId;

impl IdStrategy for LinkSplitId {
    fn torrent_id(&self, link: &str) -> Option<String> {
        extract_torrent_id_from_link(link).map(String::from)
    }
}

/// `https://site/details.php?id=12345&hit=1` → `12345`.
pub fn extract_torrent_id_from_link(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("id=")?;
    let id = rest.split('&').next().unwrap_or(rest);
    (!id.is_empty()).then_some(id)
}

/// A configured site driver. Immutable once built; share it via `Arc`.
#[derive(Debug, Clone)]
pub struct Driver {
    site: Arc<SiteDefinition>,
    endpoint: Endpoint,
    detail: DetailParser,
    discount: Arc<dyn DiscountStrategy>,
    ids: Arc<dyn IdStrategy>,
    user_info: Option<ExtractionSchema>,
    listing: Option<ListParser>,
}

impl Driver {
    /// Start from the generic capabilities for `site`.
    pub fn builder(site: Arc<SiteDefinition>, base_url: &str) -> DriverBuilder {
        DriverBuilder {
            site,
            base_url: base_url.to_string(),
            headers: Vec::new(),
            discount: None,
            ids: None,
        }
    }

    pub fn site(&self) -> &SiteDefinition {
        &self.site
    }

    pub fn site_id(&self) -> &str {
        &self.site.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn torrent_id(&self, link: &str) -> Option<String> {
        self.ids.torrent_id(link)
    }

    pub fn detect_discount(&self, document: &Html) -> DiscountResult {
        self.discount.detect(document)
    }

    /// Request for a torrent's detail page.
    pub fn prepare_detail(&self, id: &str) -> Result<PreparedRequest> {
        let params = BTreeMap::from([
            ("id".to_string(), id.to_string()),
            ("hit".to_string(), "1".to_string()),
        ]);
        self.endpoint
            .prepare(&RequestDescriptor::document(DETAILS_PATH), &params)
    }

    /// Assemble a torrent record from its detail page. The page's own id
    /// takes precedence over `fallback_id`.
    pub fn parse_detail(&self, document: &Html, fallback_id: &str) -> TorrentItem {
        let (title, page_id) = self.detail.parse_title_and_id(document);
        let size_bytes = self.detail.parse_size(document).unwrap_or(0);
        let has_hr = self.detail.parse_hr(document);
        let discount = self.discount.detect(document);

        TorrentItem {
            id: page_id.unwrap_or_else(|| fallback_id.to_string()),
            title,
            size_bytes,
            discount: discount.level,
            discount_end_time: discount.end_time,
            has_hr,
            source_site: self.site.id.clone(),
        }
    }

    /// Fetch and parse the detail page behind `link`.
    pub fn torrent_detail<S>(&self, source: &S, link: &str) -> Result<TorrentItem>
    where
        S: DocumentSource + ?Sized,
    {
        let id = self
            .ids
            .torrent_id(link)
            .ok_or_else(|| Error::Parse(format!("no torrent id in link {link:?}")))?;

        let request = self.prepare_detail(&id)?;
        debug!(site = %self.site.id, %id, url = %request.url, "fetching torrent detail");
        let document = source.fetch(&request)?;

        Ok(self.parse_detail(&document, &id))
    }

    /// Run the site's user-info schema and project it onto [`UserInfo`].
    pub fn user_info<S>(&self, source: &S) -> Result<UserInfo>
    where
        S: DocumentSource + ?Sized,
    {
        let schema = self
            .user_info
            .as_ref()
            .ok_or_else(|| Error::Config(format!("site {} has no user info schema", self.site.id)))?;
        let extraction = schema.run(source, &self.endpoint)?;
        UserInfo::from_extraction(&self.site, &extraction)
    }

    /// Parse a torrent list page.
    pub fn parse_list(&self, document: &Html) -> Result<Vec<TorrentRow>> {
        let listing = self
            .listing
            .as_ref()
            .ok_or_else(|| Error::Config(format!("site {} has no list selectors", self.site.id)))?;
        Ok(listing.parse(document, |link| self.ids.torrent_id(link)))
    }
}

/// Builds a [`Driver`], defaulting every capability that is not set.
pub struct DriverBuilder {
    site: Arc<SiteDefinition>,
    base_url: String,
    headers: Vec<(String, String)>,
    discount: Option<Arc<dyn DiscountStrategy>>,
    ids: Option<Arc<dyn IdStrategy>>,
}

impl DriverBuilder {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn discount_strategy(mut self, strategy: Arc<dyn DiscountStrategy>) -> Self {
        self.discount = Some(strategy);
        self
    }

    pub fn id_strategy(mut self, strategy: Arc<dyn IdStrategy>) -> Self {
        self.ids = Some(strategy);
        self
    }

    pub fn build(self) -> Result<Driver> {
        let offset: FixedOffset = self.site.offset()?;
        let config = &self.site.detail_parser;

        let discount = match self.discount {
            Some(strategy) => strategy,
            None => Arc::new(DetailParser::default_discount(config, offset)?),
        };

        let endpoint = self
            .headers
            .iter()
            .fold(Endpoint::new(&self.base_url)?, |e, (k, v)| e.with_header(k, v));

        Ok(Driver {
            detail: DetailParser::new(config)?,
            discount,
            ids: self.ids.unwrap_or_else(|| Arc::new(QueryParamId)),
            user_info: self
                .site
                .user_info
                .as_ref()
                .map(|schema| ExtractionSchema::compile(schema, offset))
                .transpose()?,
            listing: self
                .site
                .selectors
                .as_ref()
                .map(|selectors| ListParser::new(selectors, offset))
                .transpose()?,
            endpoint,
            site: self.site,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discount::DiscountLevel;
    use crate::request::StaticPages;
    use serde_json::json;

    fn site() -> Arc<SiteDefinition> {
        let definition: SiteDefinition = serde_json::from_value(json!({
            "id": "demo",
            "name": "Demo",
            "urls": ["https://demo.example/"],
            "timezoneOffset": "+0800",
            "detailParser": {
                "titleSelector": "h1#top",
                "idSelector": "a.dl",
                "discountSelector": "h1#top b",
                "discountMapping": {"free": "free", "twoup": "2xup"},
                "sizeSelector": "td.rowhead:contains('Size')",
                "hrKeywords": ["Hit and Run"]
            }
        }))
        .unwrap();
        Arc::new(definition)
    }

    const DETAIL: &str = r#"
    <h1 id="top">Demo.Torrent <b class="free">Free</b></h1>
    <a class="dl" href="download.php?id=77">download</a>
    <table><tr><td class="rowhead">Size</td><td>2.00 GB</td></tr></table>
    "#;

    #[test]
    fn test_extract_torrent_id_from_link() {
        assert_eq!(
            extract_torrent_id_from_link("https://site/details.php?id=12345&hit=1"),
            Some("12345")
        );
        assert_eq!(extract_torrent_id_from_link("details.php?id=9"), Some("9"));
        assert_eq!(extract_torrent_id_from_link("details.php?id=&hit=1"), None);
        assert_eq!(extract_torrent_id_from_link("https://site/browse.php"), None);
    }

    #[test]
    fn test_id_strategies() {
        assert_eq!(QueryParamId.torrent_id("details.php?hit=1&id=5"), Some("5".to_string()));
        assert_eq!(LinkSplitId.torrent_id("details.php?id=5&hit=1"), Some("5".to_string()));
        assert_eq!(QueryParamId.torrent_id("browse.php"), None);
    }

    #[test]
    fn test_default_capabilities() {
        let driver = Driver::builder(site(), "https://demo.example/").build().unwrap();
        let doc = Html::parse_document(DETAIL);
        let item = driver.parse_detail(&doc, "1");

        assert_eq!(item.id, "77");
        assert_eq!(item.title, "Demo.Torrent Free");
        assert_eq!(item.size_bytes, 2 * 1024u64.pow(3));
        assert_eq!(item.discount, DiscountLevel::Free);
        assert!(!item.has_hr);
        assert_eq!(item.source_site, "demo");
    }

    #[derive(Debug)]
    struct AlwaysTwoUp;

    impl DiscountStrategy for AlwaysTwoUp {
        fn detect(&self, _: &Html) -> DiscountResult {
            DiscountResult {
                level: DiscountLevel::TwoXUp,
                end_time: None,
            }
        }
    }

    #[test]
    fn test_discount_override_keeps_other_capabilities() {
        let driver = Driver::builder(site(), "https://demo.example/")
            .discount_strategy(Arc::new(AlwaysTwoUp))
            .build()
            .unwrap();
        let doc = Html::parse_document(DETAIL);
        let item = driver.parse_detail(&doc, "1");

        assert_eq!(item.discount, DiscountLevel::TwoXUp);
        assert_eq!(item.id, "77");
        assert_eq!(item.size_bytes, 2 * 1024u64.pow(3));
    }

    #[test]
    fn test_torrent_detail_fetches_by_id() {
        let driver = Driver::builder(site(), "https://demo.example/")
            .header("Cookie", "uid=1")
            .build()
            .unwrap();
        let pages = StaticPages::new().page("/details.php", DETAIL);

        let item = driver
            .torrent_detail(&pages, "https://demo.example/details.php?id=77&hit=1")
            .unwrap();
        assert_eq!(item.id, "77");

        let request = driver.prepare_detail("77").unwrap();
        assert_eq!(request.url.as_str(), "https://demo.example/details.php?hit=1&id=77");
        assert_eq!(request.headers, vec![("Cookie".to_string(), "uid=1".to_string())]);
    }

    #[test]
    fn test_torrent_detail_without_id() {
        let driver = Driver::builder(site(), "https://demo.example/").build().unwrap();
        let pages = StaticPages::new();
        let err = driver.torrent_detail(&pages, "https://demo.example/browse.php").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_missing_schema_and_listing() {
        let driver = Driver::builder(site(), "https://demo.example/").build().unwrap();
        assert!(matches!(driver.user_info(&StaticPages::new()), Err(Error::Config(_))));
        let doc = Html::parse_document("<p></p>");
        assert!(matches!(driver.parse_list(&doc), Err(Error::Config(_))));
    }
}
