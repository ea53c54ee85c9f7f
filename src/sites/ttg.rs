//! TTG (To The Glory)
//!
//! A NexusPHP site that marks discounts with `ico_*` images instead of
//! classes and prints the end time as red text (`到期时间为2026-01-30 16:32`).
//! Torrent ids are cut straight out of the link. Everything else is the
//! generic driver.

use regex::Regex;
use std::sync::{Arc, LazyLock};

use crate::discount::{DiscountStrategy, ImageDiscount};
use crate::driver::{Driver, LinkSplitId};
use crate::error::{Error, Result};
use crate::registry::SiteEntry;
use crate::site::{CookieOptions, SiteConfig, SiteDefinition};

pub const ID: &str = "ttg";

const DEFINITION: &str = include_str!("ttg.json");

static EXPIRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"到期时间为(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2})").unwrap());

const EXPIRY_LAYOUT: &str = "%Y-%m-%d %H:%M";

pub fn definition() -> Result<SiteDefinition> {
    SiteDefinition::from_json(DEFINITION)
}

pub fn entry() -> Result<SiteEntry> {
    Ok(SiteEntry {
        definition: Arc::new(definition()?),
        create_driver,
        discount: discount_strategy,
    })
}

/// Image-name discounts with red-text expiry.
pub fn discount_strategy(definition: &SiteDefinition) -> Result<Arc<dyn DiscountStrategy>> {
    let config = &definition.detail_parser;
    let strategy = ImageDiscount::new(
        config.discount_mapping.clone(),
        config.end_time_selector.as_deref().unwrap_or("font[color='red']"),
        EXPIRY.clone(),
        EXPIRY_LAYOUT,
        definition.offset()?,
    )?;
    Ok(Arc::new(strategy))
}

/// TTG pages are only visible when logged in, so a cookie is mandatory.
pub fn create_driver(definition: Arc<SiteDefinition>, config: &SiteConfig) -> Result<Driver> {
    let options: CookieOptions = config.options()?;
    if options.cookie.trim().is_empty() {
        return Err(Error::Config("TTG requires a cookie".to_string()));
    }
    let base_url = config.base_url_or(&definition)?.to_string();

    Driver::builder(definition.clone(), &base_url)
        .header("Cookie", &options.cookie)
        .discount_strategy(discount_strategy(&definition)?)
        .id_strategy(Arc::new(LinkSplitId))
        .build()
}
