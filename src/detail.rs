//! Generic detail-page parsing
//!
//! Title, id, size and hit-and-run markers are read the same way on every
//! NexusPHP-style site; only the selectors differ. Discount detection is
//! left to a [`DiscountStrategy`](crate::discount::DiscountStrategy).

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::discount::{ClassDiscount, DiscountLevel};
use crate::error::{Error, Result};
use crate::filters::{parse_size, query_param};
use crate::query::{element_text, parent_element, Query};

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

static SIZE_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[\d.,]+\s*[KMGTP]i?B\b").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn default_time_layout() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_title_selector() -> String {
    "h1".to_string()
}

/// Detail-page selectors as written in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailParserConfig {
    #[serde(default = "default_time_layout")]
    pub time_layout: String,
    /// Marker (class, alt text or image name) → level.
    #[serde(default)]
    pub discount_mapping: BTreeMap<String, DiscountLevel>,
    #[serde(default)]
    pub hr_keywords: Vec<String>,
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    #[serde(default)]
    pub id_selector: Option<String>,
    #[serde(default)]
    pub discount_selector: Option<String>,
    #[serde(default)]
    pub end_time_selector: Option<String>,
    #[serde(default)]
    pub size_selector: Option<String>,
    /// Applied to the size row's text; the whole match is parsed as a size.
    #[serde(default)]
    pub size_regex: Option<String>,
}

impl Default for DetailParserConfig {
    fn default() -> Self {
        Self {
            time_layout: default_time_layout(),
            discount_mapping: BTreeMap::new(),
            hr_keywords: Vec::new(),
            title_selector: default_title_selector(),
            id_selector: None,
            discount_selector: None,
            end_time_selector: None,
            size_selector: None,
            size_regex: None,
        }
    }
}

/// Compiled detail-page parser.
#[derive(Debug, Clone)]
pub struct DetailParser {
    title: Query,
    id: Option<Query>,
    size: Option<Query>,
    size_regex: Option<Regex>,
    hr_keywords: Vec<String>,
}

impl DetailParser {
    pub fn new(config: &DetailParserConfig) -> Result<Self> {
        let size_regex = config
            .size_regex
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| Error::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            title: Query::parse(&config.title_selector)?,
            id: config.id_selector.as_deref().map(Query::parse).transpose()?,
            size: config.size_selector.as_deref().map(Query::parse).transpose()?,
            size_regex,
            hr_keywords: config.hr_keywords.clone(),
        })
    }

    /// The class-based discount strategy described by the same config.
    pub fn default_discount(config: &DetailParserConfig, offset: FixedOffset) -> Result<ClassDiscount> {
        ClassDiscount::new(
            config.discount_selector.as_deref(),
            config.discount_mapping.clone(),
            config.end_time_selector.as_deref(),
            &config.time_layout,
            offset,
        )
    }

    /// Title text (whitespace collapsed) and the torrent id, if the page
    /// exposes one.
    pub fn parse_title_and_id(&self, document: &Html) -> (String, Option<String>) {
        let title = self
            .title
            .first(document)
            .map(|el| WHITESPACE.replace_all(&element_text(el), " ").into_owned())
            .unwrap_or_default();

        let id = self
            .id
            .as_ref()
            .and_then(|q| q.first(document))
            .and_then(id_from_element);

        (title, id)
    }

    /// Size in bytes, read from the row holding the size label.
    pub fn parse_size(&self, document: &Html) -> Option<u64> {
        let label = self.size.as_ref()?.first(document)?;
        let row = parent_element(label).unwrap_or(label);
        let text = row.text().collect::<String>();

        let matched = match &self.size_regex {
            Some(re) => re.find(&text)?.as_str().to_string(),
            None => SIZE_IN_TEXT.find(&text)?.as_str().to_string(),
        };
        parse_size(&matched).ok()
    }

    /// Whether any hit-and-run keyword appears in the page.
    pub fn parse_hr(&self, document: &Html) -> bool {
        if self.hr_keywords.is_empty() {
            return false;
        }
        let text = document.root_element().text().collect::<String>();
        self.hr_keywords.iter().any(|kw| text.contains(kw.as_str()))
    }
}

fn id_from_element(el: ElementRef<'_>) -> Option<String> {
    let value = el.value();
    if let Some(id) = value.attr("href").and_then(|href| query_param(href, "id")) {
        return Some(id);
    }
    ["onclick", "data-id", "id", "href"]
        .iter()
        .filter_map(|attr| value.attr(attr))
        .find_map(|raw| DIGITS.find(raw).map(|m| m.as_str().to_string()))
}

/// A torrent as assembled from its detail page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentItem {
    pub id: String,
    pub title: String,
    pub size_bytes: u64,
    pub discount: DiscountLevel,
    pub discount_end_time: Option<DateTime<FixedOffset>>,
    pub has_hr: bool,
    pub source_site: String,
}
