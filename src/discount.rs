//! Discount (free-leech) detection
//!
//! Sites mark promotional torrents in different ways. The default strategy
//! looks for marker classes; sites that encode the discount in an image
//! file name plug in [`ImageDiscount`] instead. Both return the same
//! [`DiscountResult`].

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::filters::parse_time;
use crate::query::{element_text, Query};

static DATE_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}(?::\d{2})?").unwrap());

/// Promotional state of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DiscountLevel {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "free")]
    Free,
    #[serde(rename = "2xfree")]
    TwoXFree,
    #[serde(rename = "percent_50")]
    Percent50,
    #[serde(rename = "2xup")]
    TwoXUp,
    #[serde(rename = "2x50")]
    TwoXPercent50,
    #[serde(rename = "percent_30")]
    Percent30,
    #[serde(rename = "percent_70")]
    Percent70,
}

impl DiscountLevel {
    pub fn is_discounted(self) -> bool {
        self != DiscountLevel::None
    }

    /// Whether downloads under this level cost nothing.
    pub fn is_free(self) -> bool {
        matches!(self, DiscountLevel::Free | DiscountLevel::TwoXFree)
    }
}

impl fmt::Display for DiscountLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscountLevel::None => "none",
            DiscountLevel::Free => "free",
            DiscountLevel::TwoXFree => "2xfree",
            DiscountLevel::Percent50 => "percent_50",
            DiscountLevel::TwoXUp => "2xup",
            DiscountLevel::TwoXPercent50 => "2x50",
            DiscountLevel::Percent30 => "percent_30",
            DiscountLevel::Percent70 => "percent_70",
        };
        f.write_str(name)
    }
}

/// Discount level plus the instant it ends, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscountResult {
    pub level: DiscountLevel,
    /// Only meaningful when `level` is not `None`.
    pub end_time: Option<DateTime<FixedOffset>>,
}

impl DiscountResult {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Resolves a discount from a detail page.
///
/// Implementations hold only configuration, so one instance serves every
/// document from its site.
pub trait DiscountStrategy: Send + Sync + fmt::Debug {
    fn detect(&self, document: &Html) -> DiscountResult;
}

/// Run a strategy against a document.
pub fn detect_discount(document: &Html, strategy: &dyn DiscountStrategy) -> DiscountResult {
    strategy.detect(document)
}

/// File name without directory, query string or extension.
pub fn file_stem(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Default strategy: marker classes (or `alt`/`title`/image names) mapped
/// to levels, plus a separate end-time element.
#[derive(Debug, Clone)]
pub struct ClassDiscount {
    markers: Query,
    mapping: BTreeMap<String, DiscountLevel>,
    end_time: Option<Query>,
    layout: String,
    offset: FixedOffset,
}

impl ClassDiscount {
    /// `markers` defaults to every element carrying a class.
    pub fn new(
        markers: Option<&str>,
        mapping: BTreeMap<String, DiscountLevel>,
        end_time: Option<&str>,
        layout: &str,
        offset: FixedOffset,
    ) -> Result<Self> {
        Ok(Self {
            markers: Query::parse(markers.unwrap_or("[class]"))?,
            mapping,
            end_time: end_time.map(Query::parse).transpose()?,
            layout: layout.to_string(),
            offset,
        })
    }

    fn marker_level(&self, el: ElementRef<'_>) -> Option<DiscountLevel> {
        let value = el.value();
        value
            .classes()
            .find_map(|class| self.mapping.get(class))
            .or_else(|| {
                ["alt", "title"]
                    .iter()
                    .filter_map(|attr| value.attr(attr))
                    .find_map(|marker| self.mapping.get(marker.trim()))
            })
            .or_else(|| value.attr("src").and_then(|src| self.mapping.get(file_stem(src))))
            .copied()
    }

    fn end_time(&self, document: &Html) -> Option<DateTime<FixedOffset>> {
        let el = self.end_time.as_ref()?.first(document)?;
        let raw = el
            .value()
            .attr("title")
            .filter(|t| !t.trim().is_empty())
            .map(String::from)
            .unwrap_or_else(|| element_text(el));
        let stamp = DATE_TIME.find(&raw)?.as_str();
        parse_time(stamp, Some(&self.layout), self.offset)
            .or_else(|_| parse_time(stamp, None, self.offset))
            .ok()
    }
}

impl DiscountStrategy for ClassDiscount {
    fn detect(&self, document: &Html) -> DiscountResult {
        let level = self
            .markers
            .select(document)
            .into_iter()
            .find_map(|el| self.marker_level(el))
            .unwrap_or_default();

        if !level.is_discounted() {
            return DiscountResult::none();
        }

        DiscountResult {
            level,
            end_time: self.end_time(document),
        }
    }
}

/// Override strategy for sites that encode the level in a marker image's
/// file name and print the end time as free text.
///
/// Only the first marker image is considered; duplicates are ignored.
#[derive(Debug, Clone)]
pub struct ImageDiscount {
    images: Query,
    mapping: BTreeMap<String, DiscountLevel>,
    expiry_text: Query,
    expiry_pattern: Regex,
    layout: String,
    offset: FixedOffset,
}

impl ImageDiscount {
    /// `expiry_pattern` must capture the timestamp in group 1.
    pub fn new(
        mapping: BTreeMap<String, DiscountLevel>,
        expiry_selector: &str,
        expiry_pattern: Regex,
        layout: &str,
        offset: FixedOffset,
    ) -> Result<Self> {
        if mapping.is_empty() {
            return Err(Error::Config("image discount needs a non-empty mapping".to_string()));
        }
        if expiry_pattern.captures_len() < 2 {
            return Err(Error::InvalidRegex {
                pattern: expiry_pattern.as_str().to_string(),
                reason: "expiry pattern needs a capture group".to_string(),
            });
        }

        let images = mapping
            .keys()
            .map(|key| format!("img[src*='{}']", key.replace('\'', "\\'")))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(Self {
            images: Query::parse(&images)?,
            mapping,
            expiry_text: Query::parse(expiry_selector)?,
            expiry_pattern,
            layout: layout.to_string(),
            offset,
        })
    }

    fn end_time(&self, document: &Html) -> Option<DateTime<FixedOffset>> {
        self.expiry_text.select(document).into_iter().find_map(|el| {
            let text = el.text().collect::<String>();
            let caps = self.expiry_pattern.captures(&text)?;
            parse_time(caps.get(1)?.as_str(), Some(&self.layout), self.offset).ok()
        })
    }
}

impl DiscountStrategy for ImageDiscount {
    fn detect(&self, document: &Html) -> DiscountResult {
        let Some(marker) = self.images.first(document) else {
            return DiscountResult::none();
        };

        let level = marker
            .value()
            .attr("src")
            .and_then(|src| self.mapping.get(file_stem(src)))
            .copied()
            .unwrap_or_default();

        if !level.is_discounted() {
            debug!(src = ?marker.value().attr("src"), "marker image not in discount mapping");
            return DiscountResult::none();
        }

        DiscountResult {
            level,
            end_time: self.end_time(document),
        }
    }
}
