//! Multi-stage extraction schemas
//!
//! A schema is an ordered list of stages. Each stage fetches one page and
//! resolves a subset of the shared field selectors against it. A stage may
//! assert that a value from an earlier stage is the one it was requested
//! with (e.g. the user id on the profile page); a mismatch aborts the
//! whole extraction.

use chrono::FixedOffset;
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::request::{DocumentSource, Endpoint, PreparedRequest, RequestDescriptor};
use crate::selector::{Extraction, FieldSelector, FieldSet};

const PARAMS_PREFIX: &str = "params.";

/// One stage as written in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub request_config: RequestDescriptor,
    /// Field names resolved on this stage's page.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Field name → `params.<name>`: the request parameter filled from the
    /// earlier value of that field.
    #[serde(default)]
    pub assertion: BTreeMap<String, String>,
}

/// A schema as written in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaConfig {
    pub process: Vec<StageConfig>,
    #[serde(default)]
    pub selectors: BTreeMap<String, FieldSelector>,
    /// Fields that later stages may overwrite. Everything else is
    /// first-writer-wins.
    #[serde(default)]
    pub pick_last: Vec<String>,
    /// Milliseconds the transport should wait between stages.
    #[serde(default)]
    pub request_delay: u64,
}

#[derive(Debug, Clone)]
struct Stage {
    request: RequestDescriptor,
    fields: Vec<String>,
    /// (field, request parameter)
    assertions: Vec<(String, String)>,
}

/// A compiled, immutable extraction schema.
#[derive(Debug, Clone)]
pub struct ExtractionSchema {
    stages: Vec<Stage>,
    fields: FieldSet,
    pick_last: BTreeSet<String>,
    request_delay: Duration,
}

impl ExtractionSchema {
    /// Compile and validate a schema.
    pub fn compile(config: &SchemaConfig, offset: FixedOffset) -> Result<Self> {
        let fields = FieldSet::compile(&config.selectors, offset)?;
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut stages = Vec::with_capacity(config.process.len());

        for (index, stage) in config.process.iter().enumerate() {
            for field in &stage.fields {
                if !fields.contains(field) {
                    return Err(Error::Config(format!(
                        "stage {index} lists {field} but no selector defines it"
                    )));
                }
            }

            let mut assertions = Vec::with_capacity(stage.assertion.len());
            for (field, template) in &stage.assertion {
                let param = template.strip_prefix(PARAMS_PREFIX).ok_or_else(|| {
                    Error::Config(format!(
                        "stage {index} assertion for {field} must reference params.<name>, got {template:?}"
                    ))
                })?;
                if !seen.contains(field.as_str()) {
                    return Err(Error::Config(format!(
                        "stage {index} asserts {field} before any stage resolves it"
                    )));
                }
                assertions.push((field.clone(), param.to_string()));
            }

            seen.extend(stage.fields.iter().map(String::as_str));
            stages.push(Stage {
                request: stage.request_config.clone(),
                fields: stage.fields.clone(),
                assertions,
            });
        }

        Ok(Self {
            stages,
            fields,
            pick_last: config.pick_last.iter().cloned().collect(),
            request_delay: Duration::from_millis(config.request_delay),
        })
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Run every stage in order, fetching pages through `source`.
    pub fn run<S>(&self, source: &S, endpoint: &Endpoint) -> Result<Extraction>
    where
        S: DocumentSource + ?Sized,
    {
        let mut result = Extraction::default();

        for (index, stage) in self.stages.iter().enumerate() {
            let params = self.assertion_params(index, stage, &result)?;

            let mut request: PreparedRequest = endpoint.prepare(&stage.request, &params)?;
            if index > 0 {
                request.delay = self.request_delay;
            }
            debug!(stage = index, url = %request.url, "fetching stage");
            let document = source.fetch(&request)?;

            self.check_assertions(index, stage, &params, &document)?;

            let stage_values = self.fields.extract(&document, Some(stage.fields.as_slice()));
            self.merge(&mut result, stage_values);
        }

        Ok(result)
    }

    fn assertion_params(
        &self,
        index: usize,
        stage: &Stage,
        resolved: &Extraction,
    ) -> Result<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        for (field, param) in &stage.assertions {
            let Some(value) = resolved.get(field) else {
                warn!(stage = index, field = %field, "asserted field was never resolved");
                return Err(Error::AssertionMismatch {
                    stage: index,
                    field: field.clone(),
                    expected: "<resolved value>".to_string(),
                    found: "<missing>".to_string(),
                });
            };
            params.insert(param.clone(), value.to_string());
        }
        Ok(params)
    }

    /// Asserted fields that also resolve on this page must agree with the
    /// value the request was built from.
    fn check_assertions(
        &self,
        index: usize,
        stage: &Stage,
        params: &BTreeMap<String, String>,
        document: &Html,
    ) -> Result<()> {
        for (field, param) in &stage.assertions {
            let Ok(found) = self.fields.resolve(field, document) else {
                continue;
            };
            let expected = params.get(param).map(String::as_str).unwrap_or_default();
            let found = found.to_string();
            if found != expected {
                warn!(stage = index, field = %field, %expected, %found, "stage assertion failed");
                return Err(Error::AssertionMismatch {
                    stage: index,
                    field: field.clone(),
                    expected: expected.to_string(),
                    found,
                });
            }
        }
        Ok(())
    }

    fn merge(&self, into: &mut Extraction, stage: Extraction) {
        for (field, value) in stage.values {
            if !into.values.contains_key(&field) || self.pick_last.contains(&field) {
                into.errors.remove(&field);
                into.values.insert(field, value);
            }
        }
        for (field, err) in stage.errors {
            if !into.values.contains_key(&field) {
                into.errors.insert(field, err);
            }
        }
    }
}

/// Evaluate a schema against a single document: every stage reads `document`.
///
/// Stage requests are still prepared (assertions fill their parameters)
/// but never leave the process, so they are built against a local
/// placeholder base URL.
pub fn extract(document: &Html, schema: &ExtractionSchema) -> Result<Extraction> {
    let endpoint = Endpoint::new(OFFLINE_BASE)?;
    let source = |_: &PreparedRequest| -> Result<Html> { Ok(document.clone()) };
    schema.run(&source, &endpoint)
}

const OFFLINE_BASE: &str = "http://localhost/";
