//! Site definitions and user configuration
//!
//! A [`SiteDefinition`] is the static, shipped description of a tracker: its
//! URLs, timezone, selectors and level table. A [`SiteConfig`] is what the
//! user supplies for one site (base URL override, credentials).

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::detail::DetailParserConfig;
use crate::error::{Error, Result};
use crate::filters::parse_size;
use crate::listing::SiteSelectors;
use crate::schema::SchemaConfig;
use crate::selector::Extraction;

fn default_schema() -> String {
    "NexusPHP".to_string()
}

fn default_timezone() -> String {
    "+0000".to_string()
}

/// Static description of a tracker site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aka: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub favicon_url: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone_offset: String,
    #[serde(default)]
    pub user_info: Option<SchemaConfig>,
    #[serde(default)]
    pub selectors: Option<SiteSelectors>,
    #[serde(default)]
    pub detail_parser: DetailParserConfig,
    #[serde(default)]
    pub level_requirements: Vec<SiteLevelRequirement>,
}

impl SiteDefinition {
    pub fn from_json(json: &str) -> Result<Self> {
        let definition: SiteDefinition = serde_json::from_str(json)?;
        if definition.id.trim().is_empty() {
            return Err(Error::Config("site definition without an id".to_string()));
        }
        Ok(definition)
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.timezone_offset)
    }

    /// The default base URL.
    pub fn primary_url(&self) -> Option<&str> {
        self.urls.first().map(String::as_str)
    }

    /// Whether `name` is this site's id or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name) || self.aka.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// The level whose name best matches a scraped level label.
    ///
    /// An exact (case-insensitive) match wins; otherwise the longest level
    /// name contained in the label, so "PetaByte" is not read as "Byte".
    pub fn level_for(&self, label: &str) -> Option<&SiteLevelRequirement> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        self.level_requirements
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(label))
            .or_else(|| {
                self.level_requirements
                    .iter()
                    .filter(|l| !l.name.is_empty() && label.contains(l.name.as_str()))
                    .max_by_key(|l| l.name.len())
            })
    }
}

/// Parse `+0800`, `-0530`, `+08:00` or `+08` into a fixed offset.
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    let bad = || Error::Config(format!("invalid timezone offset {raw:?}"));

    let (sign, digits) = match raw.chars().next() {
        Some('+') => (1, &raw[1..]),
        Some('-') => (-1, &raw[1..]),
        _ => return Err(bad()),
    };
    let digits = digits.replace(':', "");
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    let (hours, minutes) = match digits.len() {
        2 => (&digits[..2], "0"),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(bad()),
    };
    let hours: i32 = hours.parse().map_err(|_| bad())?;
    let minutes: i32 = minutes.parse().map_err(|_| bad())?;
    if minutes >= 60 {
        return Err(bad());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

/// User-supplied configuration for one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Requests per second, for the transport layer.
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default)]
    pub rate_burst: Option<u32>,
    /// Site-specific options such as the login cookie.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl SiteConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_cookie(mut self, cookie: &str) -> Self {
        self.options = serde_json::json!({ "cookie": cookie });
        self
    }

    /// Decode `options` into the site's option type. Absent options decode
    /// as an empty object.
    pub fn options<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let options = match &self.options {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(options).map_err(|e| Error::Config(format!("site {}: {e}", self.id)))
    }

    /// The configured base URL, or the definition's first URL.
    pub fn base_url_or<'a>(&'a self, definition: &'a SiteDefinition) -> Result<&'a str> {
        self.base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| definition.primary_url())
            .ok_or_else(|| Error::Config(format!("site {} has no base URL", definition.id)))
    }
}

/// Options shared by cookie-authenticated NexusPHP sites.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CookieOptions {
    #[serde(default)]
    pub cookie: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    User,
    Vip,
    Manager,
}

/// One rung of a site's class ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteLevelRequirement {
    pub id: i32,
    pub name: String,
    /// Minimum account age as an ISO-8601 week duration (`P5W`).
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub downloaded: Option<String>,
    #[serde(default)]
    pub uploaded: Option<String>,
    #[serde(default)]
    pub ratio: Option<f64>,
    #[serde(default)]
    pub group_type: GroupType,
    #[serde(default)]
    pub privilege: Option<String>,
}

impl SiteLevelRequirement {
    pub fn interval_weeks(&self) -> Option<u32> {
        self.interval
            .as_deref()?
            .trim()
            .strip_prefix('P')?
            .strip_suffix('W')?
            .parse()
            .ok()
    }

    pub fn downloaded_bytes(&self) -> Option<u64> {
        parse_size(self.downloaded.as_deref()?).ok()
    }

    pub fn uploaded_bytes(&self) -> Option<u64> {
        parse_size(self.uploaded.as_deref()?).ok()
    }
}

/// Account statistics scraped from a site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub site: String,
    pub id: String,
    pub name: String,
    pub uploaded: u64,
    pub downloaded: u64,
    /// `None` when the site shows no ratio; infinite for no downloads.
    pub ratio: Option<f64>,
    pub seeding: Option<u64>,
    pub leeching: Option<u64>,
    pub bonus: Option<f64>,
    pub bonus_per_hour: Option<f64>,
    pub message_count: u64,
    pub join_time: Option<DateTime<FixedOffset>>,
    pub level_name: Option<String>,
    pub level_id: Option<i32>,
}

impl UserInfo {
    /// Project an extraction onto the typed record. `id` and `name` are
    /// required; everything else is optional.
    pub fn from_extraction(site: &SiteDefinition, extraction: &Extraction) -> Result<Self> {
        let id = extraction.require("id")?.to_string();
        let name = extraction.require("name")?.to_string();
        let level_name = extraction.text("levelName").map(String::from);
        let level_id = level_name
            .as_deref()
            .and_then(|label| site.level_for(label))
            .map(|level| level.id);

        Ok(Self {
            site: site.id.clone(),
            id,
            name,
            uploaded: extraction.bytes("uploaded").unwrap_or(0),
            downloaded: extraction.bytes("downloaded").unwrap_or(0),
            ratio: extraction.number("ratio"),
            seeding: extraction.count("seeding"),
            leeching: extraction.count("leeching"),
            bonus: extraction.number("bonus"),
            bonus_per_hour: extraction.number("bonusPerHour"),
            message_count: extraction.count("messageCount").unwrap_or(0),
            join_time: extraction.get("joinTime").and_then(|v| v.as_time()),
            level_name,
            level_id,
        })
    }
}
