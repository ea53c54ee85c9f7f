//! Site registry
//!
//! An explicit, ordered collection of site definitions and the factories
//! that turn them into drivers. Nothing registers itself; callers build a
//! registry (usually [`Registry::builtin`]) and pass it where drivers are
//! composed.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::detail::DetailParser;
use crate::discount::DiscountStrategy;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::site::{CookieOptions, SiteConfig, SiteDefinition};
use crate::sites;

/// Builds a driver for a definition and the user's configuration.
pub type DriverFactory = fn(Arc<SiteDefinition>, &SiteConfig) -> Result<Driver>;

/// Builds the discount strategy a site's drivers use.
pub type DiscountFactory = fn(&SiteDefinition) -> Result<Arc<dyn DiscountStrategy>>;

/// A definition plus the hooks that specialize it.
#[derive(Debug, Clone)]
pub struct SiteEntry {
    pub definition: Arc<SiteDefinition>,
    pub create_driver: DriverFactory,
    pub discount: DiscountFactory,
}

impl SiteEntry {
    /// An entry using the generic NexusPHP capabilities.
    pub fn generic(definition: SiteDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
            create_driver: generic_driver,
            discount: generic_discount,
        }
    }
}

/// Generic driver: configured (or first) base URL, optional cookie.
pub fn generic_driver(definition: Arc<SiteDefinition>, config: &SiteConfig) -> Result<Driver> {
    let options: CookieOptions = config.options()?;
    let base_url = config.base_url_or(&definition)?.to_string();

    let mut builder = Driver::builder(definition, &base_url);
    if !options.cookie.is_empty() {
        builder = builder.header("Cookie", &options.cookie);
    }
    builder.build()
}

/// Class-based discount detection from the definition's detail selectors.
pub fn generic_discount(definition: &SiteDefinition) -> Result<Arc<dyn DiscountStrategy>> {
    let strategy = DetailParser::default_discount(&definition.detail_parser, definition.offset()?)?;
    Ok(Arc::new(strategy))
}

/// Ordered site registry.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<SiteEntry>,
    by_id: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every site shipped with the crate, in a fixed order.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(sites::ttg::entry()?)?;
        Ok(registry)
    }

    /// Add an entry. Ids must be unique.
    pub fn register(&mut self, entry: SiteEntry) -> Result<()> {
        let id = entry.definition.id.clone();
        if self.by_id.contains_key(&id) {
            return Err(Error::Config(format!("site {id} registered twice")));
        }
        // Fail now rather than on first use
        entry.definition.offset()?;

        debug!(site = %id, "registered site definition");
        self.by_id.insert(id, self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SiteDefinition> {
        self.entry(id).map(|e| e.definition.as_ref())
    }

    /// Look up by id or alias, ignoring ASCII case.
    pub fn find(&self, name: &str) -> Option<&SiteDefinition> {
        self.get(name).or_else(|| {
            self.entries
                .iter()
                .map(|e| e.definition.as_ref())
                .find(|d| d.answers_to(name))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &SiteDefinition> {
        self.entries.iter().map(|e| e.definition.as_ref())
    }

    /// Build the driver for a configured site.
    pub fn create_driver(&self, config: &SiteConfig) -> Result<Driver> {
        let entry = self.resolve(&config.id)?;
        (entry.create_driver)(entry.definition.clone(), config)
    }

    /// The discount strategy a site's drivers would use.
    pub fn discount_strategy(&self, id: &str) -> Result<Arc<dyn DiscountStrategy>> {
        let entry = self.resolve(id)?;
        (entry.discount)(&entry.definition)
    }

    fn entry(&self, id: &str) -> Option<&SiteEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    fn resolve(&self, name: &str) -> Result<&SiteEntry> {
        self.entry(name)
            .or_else(|| self.entries.iter().find(|e| e.definition.answers_to(name)))
            .ok_or_else(|| Error::Config(format!("unknown site {name}")))
    }
}
