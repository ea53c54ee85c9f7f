//! Declarative field extraction for private tracker pages
//!
//! Site definitions describe, as data, how to pull values out of tracker
//! HTML: which elements to query, how to read them, and a pipeline of
//! filters that turns raw strings into numbers, byte sizes and timestamps.
//! On top of that sit multi-stage user-info schemas, discount detection
//! strategies, and per-site drivers assembled from a [`Registry`].
//!
//! The crate never performs I/O. Pages are supplied through a
//! [`DocumentSource`]; a C ABI in [`ffi`] exposes the same engine with
//! JSON in and out.

pub mod detail;
pub mod discount;
pub mod driver;
pub mod error;
pub mod ffi;
pub mod filters;
pub mod listing;
pub mod query;
pub mod registry;
pub mod request;
pub mod schema;
pub mod selector;
pub mod site;
pub mod sites;
pub mod value;

pub use detail::{DetailParser, DetailParserConfig, TorrentItem};
pub use discount::{
    detect_discount, ClassDiscount, DiscountLevel, DiscountResult, DiscountStrategy, ImageDiscount,
};
pub use driver::{extract_torrent_id_from_link, Driver, IdStrategy, LinkSplitId, QueryParamId};
pub use error::{Error, Result};
pub use filters::{FilterInvocation, Pipeline};
pub use listing::{ListParser, SiteSelectors, TorrentRow};
pub use query::{Extract, Query};
pub use registry::{Registry, SiteEntry};
pub use request::{DocumentSource, Endpoint, PreparedRequest, RequestDescriptor, StaticPages};
pub use schema::{extract, ExtractionSchema, SchemaConfig};
pub use selector::{Extraction, Field, FieldSelector, FieldSet};
pub use site::{SiteConfig, SiteDefinition, SiteLevelRequirement, UserInfo};
pub use value::FieldValue;
