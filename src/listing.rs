//! Torrent list pages
//!
//! Each row of the browse table becomes a [`TorrentRow`]. Rows without a
//! title link (headers, separators) are skipped.

use chrono::{DateTime, FixedOffset};
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::discount::{file_stem, DiscountLevel};
use crate::error::Result;
use crate::filters::{parse_number, parse_size, parse_time};
use crate::query::{element_text, Query};

/// List-page selectors as written in a site definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSelectors {
    pub table_rows: String,
    pub title: String,
    pub title_link: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub seeders: Option<String>,
    #[serde(default)]
    pub leechers: Option<String>,
    #[serde(default)]
    pub snatched: Option<String>,
    #[serde(default)]
    pub discount_icon: Option<String>,
    /// Icon name (or class) → level.
    #[serde(default)]
    pub discount_mapping: BTreeMap<String, DiscountLevel>,
    #[serde(default)]
    pub discount_end_time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub upload_time: Option<String>,
}

/// One row of a torrent list page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentRow {
    pub id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub link: Option<String>,
    pub size_bytes: Option<u64>,
    pub seeders: Option<u64>,
    pub leechers: Option<u64>,
    pub snatched: Option<u64>,
    pub discount: DiscountLevel,
    pub discount_end_time: Option<DateTime<FixedOffset>>,
    pub category: Option<String>,
    pub upload_time: Option<DateTime<FixedOffset>>,
}

/// Compiled list-page parser.
#[derive(Debug, Clone)]
pub struct ListParser {
    rows: Query,
    title: Query,
    title_link: Query,
    subtitle: Option<Query>,
    size: Option<Query>,
    seeders: Option<Query>,
    leechers: Option<Query>,
    snatched: Option<Query>,
    discount_icon: Option<Query>,
    discount_mapping: BTreeMap<String, DiscountLevel>,
    discount_end_time: Option<Query>,
    category: Option<Query>,
    upload_time: Option<Query>,
    offset: FixedOffset,
}

fn optional(source: &Option<String>) -> Result<Option<Query>> {
    source.as_deref().map(Query::parse).transpose()
}

impl ListParser {
    pub fn new(config: &SiteSelectors, offset: FixedOffset) -> Result<Self> {
        Ok(Self {
            rows: Query::parse(&config.table_rows)?,
            title: Query::parse(&config.title)?,
            title_link: Query::parse(&config.title_link)?,
            subtitle: optional(&config.subtitle)?,
            size: optional(&config.size)?,
            seeders: optional(&config.seeders)?,
            leechers: optional(&config.leechers)?,
            snatched: optional(&config.snatched)?,
            discount_icon: optional(&config.discount_icon)?,
            discount_mapping: config.discount_mapping.clone(),
            discount_end_time: optional(&config.discount_end_time)?,
            category: optional(&config.category)?,
            upload_time: optional(&config.upload_time)?,
            offset,
        })
    }

    /// Parse every torrent row on the page. `id_of` maps a title link to
    /// the torrent id.
    pub fn parse<F>(&self, document: &Html, id_of: F) -> Vec<TorrentRow>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rows: Vec<TorrentRow> = self
            .rows
            .select(document)
            .into_iter()
            .filter_map(|row| self.parse_row(row, &id_of))
            .collect();
        debug!(rows = rows.len(), "parsed torrent list");
        rows
    }

    fn parse_row<F>(&self, row: ElementRef<'_>, id_of: &F) -> Option<TorrentRow>
    where
        F: Fn(&str) -> Option<String>,
    {
        let title_el = self.title.first_in(row)?;
        let title = title_el
            .value()
            .attr("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| element_text(title_el));

        let link = self
            .title_link
            .first_in(row)
            .and_then(|a| a.value().attr("href"))
            .map(String::from);

        let (discount, discount_end_time) = self.discount(row);

        Some(TorrentRow {
            id: link.as_deref().and_then(id_of),
            title,
            subtitle: self.text(&self.subtitle, row).filter(|s| !s.is_empty()),
            link,
            size_bytes: self.text(&self.size, row).and_then(|s| parse_size(&s).ok()),
            seeders: self.count(&self.seeders, row),
            leechers: self.count(&self.leechers, row),
            snatched: self.count(&self.snatched, row),
            discount,
            discount_end_time,
            category: self
                .element(&self.category, row)
                .and_then(|el| el.value().attr("alt"))
                .map(String::from),
            upload_time: self.time(&self.upload_time, row),
        })
    }

    fn element<'a>(&self, query: &Option<Query>, row: ElementRef<'a>) -> Option<ElementRef<'a>> {
        query.as_ref()?.first_in(row)
    }

    fn text(&self, query: &Option<Query>, row: ElementRef<'_>) -> Option<String> {
        self.element(query, row).map(element_text)
    }

    fn count(&self, query: &Option<Query>, row: ElementRef<'_>) -> Option<u64> {
        let n = parse_number(&self.text(query, row)?).ok()?;
        (n.is_finite() && n >= 0.0).then_some(n as u64)
    }

    /// Times are read from the `title` attribute, falling back to text.
    fn time(&self, query: &Option<Query>, row: ElementRef<'_>) -> Option<DateTime<FixedOffset>> {
        let el = self.element(query, row)?;
        let raw = el
            .value()
            .attr("title")
            .map(String::from)
            .unwrap_or_else(|| element_text(el));
        parse_time(&raw, None, self.offset).ok()
    }

    fn discount(&self, row: ElementRef<'_>) -> (DiscountLevel, Option<DateTime<FixedOffset>>) {
        let level = self
            .element(&self.discount_icon, row)
            .and_then(|icon| {
                let value = icon.value();
                value
                    .attr("src")
                    .and_then(|src| self.discount_mapping.get(file_stem(src)))
                    .or_else(|| value.classes().find_map(|c| self.discount_mapping.get(c)))
            })
            .copied()
            .unwrap_or_default();

        if !level.is_discounted() {
            return (level, None);
        }
        (level, self.time(&self.discount_end_time, row))
    }
}
