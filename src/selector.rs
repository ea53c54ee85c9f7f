//! Field selectors
//!
//! A field selector resolves one named value from a document: candidate
//! queries are tried in order, the first matching node is read through the
//! extraction mode, and the raw value runs through the field's filters.

use chrono::FixedOffset;
use scraper::Html;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::filters::{FilterContext, FilterInvocation, Pipeline};
use crate::query::{Extract, Query};
use crate::value::{FieldValue, Value};

/// Declarative field configuration, as written in site definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSelector {
    /// Candidate queries, tried in order. A single string is accepted.
    #[serde(default, deserialize_with = "one_or_many")]
    pub selector: Vec<String>,
    /// `text`, `html`, `attr:<name>` or a bare attribute name.
    #[serde(default)]
    pub attr: Extract,
    /// Literal used when no candidate matches.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterInvocation>,
}

impl FieldSelector {
    pub fn new(candidates: &[&str]) -> Self {
        Self {
            selector: candidates.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, accessor: &str) -> Self {
        self.attr = Extract::from_accessor(accessor);
        self
    }

    pub fn fallback(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn filter(mut self, name: &str, args: Vec<serde_json::Value>) -> Self {
        self.filters.push(FilterInvocation::new(name, args));
        self
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// A compiled field selector.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    candidates: Vec<Query>,
    extract: Extract,
    fallback: Option<String>,
    pipeline: Pipeline,
}

impl Field {
    pub fn compile(name: &str, config: &FieldSelector) -> Result<Self> {
        let candidates = config
            .selector
            .iter()
            .map(|s| Query::parse(s))
            .collect::<Result<Vec<_>>>()?;

        if candidates.is_empty() && config.text.is_none() {
            return Err(Error::Config(format!(
                "field {name} has neither selectors nor a literal fallback"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            candidates,
            extract: config.attr.clone(),
            fallback: config.text.clone(),
            pipeline: Pipeline::compile(&config.filters)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve against a document.
    ///
    /// Only the first node of the first matching candidate is read. A miss
    /// yields `SelectorMiss`, a rejected filter `FilterFailure`.
    pub fn resolve(&self, document: &Html, offset: FixedOffset) -> Result<FieldValue> {
        let seed = self
            .candidates
            .iter()
            .find_map(|query| {
                let node = query.first(document)?;
                // A missing attribute counts as no match for this candidate
                match &self.extract {
                    Extract::Attr(attr) if node.value().attr(attr).is_none() => None,
                    _ => Some(Value::Node(node)),
                }
            })
            .map(|node| (node, false))
            .or_else(|| self.fallback.clone().map(|text| (Value::Text(text), true)));

        let Some((seed, literal)) = seed else {
            debug!(field = %self.name, "no candidate matched");
            return Err(Error::SelectorMiss {
                field: self.name.clone(),
            });
        };

        let ctx = FilterContext {
            extract: &self.extract,
            offset,
        };
        match self.pipeline.run(&self.name, seed, &ctx) {
            // A literal the pipeline cannot digest is already the answer
            Err(err) if literal => {
                debug!(field = %self.name, error = %err, "using literal fallback as is");
                Ok(FieldValue::Text(self.fallback.clone().unwrap_or_default()))
            }
            result => result.inspect_err(|err| {
                warn!(field = %self.name, error = %err, "field pipeline failed");
            }),
        }
    }
}

/// Values resolved from one or more documents, plus per-field failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub values: BTreeMap<String, FieldValue>,
    /// Field-level errors for fields that ended up without a value.
    pub errors: BTreeMap<String, Error>,
}

impl Extraction {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(FieldValue::as_str)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(FieldValue::as_f64)
    }

    pub fn bytes(&self, field: &str) -> Option<u64> {
        self.values.get(field).and_then(FieldValue::as_u64)
    }

    pub fn count(&self, field: &str) -> Option<u64> {
        self.values.get(field).and_then(FieldValue::as_count)
    }

    /// Fail with the recorded error (or a miss) when `field` is absent.
    pub fn require(&self, field: &str) -> Result<&FieldValue> {
        self.values.get(field).ok_or_else(|| {
            self.errors.get(field).cloned().unwrap_or(Error::SelectorMiss {
                field: field.to_string(),
            })
        })
    }
}

/// A set of compiled fields sharing one timezone.
#[derive(Debug, Clone)]
pub struct FieldSet {
    fields: BTreeMap<String, Field>,
    offset: FixedOffset,
}

impl FieldSet {
    pub fn compile(selectors: &BTreeMap<String, FieldSelector>, offset: FixedOffset) -> Result<Self> {
        let fields = selectors
            .iter()
            .map(|(name, config)| Ok((name.clone(), Field::compile(name, config)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { fields, offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Resolve one field.
    pub fn resolve(&self, name: &str, document: &Html) -> Result<FieldValue> {
        let field = self
            .fields
            .get(name)
            .ok_or_else(|| Error::Config(format!("no selector for field {name}")))?;
        field.resolve(document, self.offset)
    }

    /// Resolve the named fields (or all of them) against one document.
    /// Field-level failures land in `errors`; other fields still resolve.
    pub fn extract<S: AsRef<str>>(&self, document: &Html, names: Option<&[S]>) -> Extraction {
        let mut extraction = Extraction::default();
        let names: Vec<&str> = match names {
            Some(names) => names.iter().map(|n| n.as_ref()).collect(),
            None => self.names().collect(),
        };

        for name in names {
            match self.resolve(name, document) {
                Ok(value) => {
                    extraction.values.insert(name.to_string(), value);
                }
                Err(err) => {
                    extraction.errors.insert(name.to_string(), err);
                }
            }
        }

        extraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cst() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    const PAGE: &str = r#"
    <html><body>
        <h1 class="title">Main Title</h1>
        <h1 class="title">Duplicate Title</h1>
        <div class="size">Size: 150GB</div>
        <a class="user" href="userdetails.php?id=151907">alice</a>
        <a class="nolink">no href</a>
    </body></html>
    "#;

    #[test]
    fn test_fallback_ordering() {
        let doc = Html::parse_document(PAGE);
        let field = Field::compile("title", &FieldSelector::new(&["h2.missing", "h1.title"])).unwrap();
        assert_eq!(
            field.resolve(&doc, cst()).unwrap(),
            FieldValue::Text("Main Title".to_string())
        );
    }

    #[test]
    fn test_first_candidate_wins() {
        let doc = Html::parse_document(PAGE);
        let field = Field::compile("title", &FieldSelector::new(&["div.size", "h1.title"])).unwrap();
        assert_eq!(
            field.resolve(&doc, cst()).unwrap(),
            FieldValue::Text("Size: 150GB".to_string())
        );
    }

    #[test]
    fn test_missing_attribute_moves_to_next_candidate() {
        let doc = Html::parse_document(PAGE);
        let config = FieldSelector::new(&["a.nolink", "a.user"])
            .attr("href")
            .filter("querystring", vec![json!("id")]);
        let field = Field::compile("id", &config).unwrap();
        assert_eq!(field.resolve(&doc, cst()).unwrap(), FieldValue::Text("151907".to_string()));
    }

    #[test]
    fn test_miss_and_literal_fallback() {
        let doc = Html::parse_document(PAGE);
        let miss = Field::compile("messageCount", &FieldSelector::new(&["a.messages"])).unwrap();
        assert_eq!(
            miss.resolve(&doc, cst()).unwrap_err(),
            Error::SelectorMiss { field: "messageCount".to_string() }
        );

        let seeded = FieldSelector::new(&["a.messages"])
            .fallback("0")
            .filter("parseNumber", vec![]);
        let field = Field::compile("messageCount", &seeded).unwrap();
        assert_eq!(field.resolve(&doc, cst()).unwrap(), FieldValue::Number(0.0));
    }

    #[test]
    fn test_literal_survives_node_only_filters() {
        let doc = Html::parse_document(PAGE);
        let config = FieldSelector::new(&["a.messages"])
            .fallback("0")
            .filter("parentText", vec![])
            .filter("regex", vec![json!(r"(\d+)\s*\(")]);
        let field = Field::compile("messageCount", &config).unwrap();
        let value = field.resolve(&doc, cst()).unwrap();
        assert_eq!(value, FieldValue::Text("0".to_string()));
        assert_eq!(value.as_count(), Some(0));
    }

    #[test]
    fn test_matched_node_failure_is_not_masked_by_literal() {
        let doc = Html::parse_document(PAGE);
        let config = FieldSelector::new(&["div.size"])
            .fallback("0")
            .filter("regex", vec![json!(r"Ratio: (\S+)")]);
        let field = Field::compile("ratio", &config).unwrap();
        assert!(matches!(field.resolve(&doc, cst()), Err(Error::FilterFailure { .. })));
    }

    #[test]
    fn test_field_set_isolates_failures() {
        let doc = Html::parse_document(PAGE);
        let mut selectors = BTreeMap::new();
        selectors.insert(
            "size".to_string(),
            FieldSelector::new(&["div.size"])
                .filter("regex", vec![json!(r"Size:\s*(.+)")])
                .filter("parseSize", vec![]),
        );
        selectors.insert(
            "ratio".to_string(),
            FieldSelector::new(&["div.size"]).filter("regex", vec![json!(r"Ratio: (\S+)")]),
        );
        let set = FieldSet::compile(&selectors, cst()).unwrap();
        let out = set.extract::<&str>(&doc, None);

        assert_eq!(out.bytes("size"), Some(150 * 1024u64.pow(3)));
        assert!(out.get("ratio").is_none());
        assert!(matches!(out.errors.get("ratio"), Some(Error::FilterFailure { .. })));
        assert!(out.require("ratio").is_err());
    }

    #[test]
    fn test_deserialize_field_selector() {
        let config: FieldSelector = serde_json::from_value(json!({
            "selector": "a[href*='userdetails.php']",
            "attr": "href",
            "filters": [{"name": "querystring", "args": ["id"]}]
        }))
        .unwrap();
        assert_eq!(config.selector, vec!["a[href*='userdetails.php']".to_string()]);
        assert_eq!(config.attr, Extract::Attr("href".to_string()));
        assert_eq!(config.filters.len(), 1);
    }

    #[test]
    fn test_empty_field_rejected() {
        assert!(matches!(
            Field::compile("x", &FieldSelector::default()),
            Err(Error::Config(_))
        ));
    }
}
