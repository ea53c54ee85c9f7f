//! Field filters
//!
//! A filter is a named, pure transformation applied to the value a field
//! selector produced. Filters are declared as data (`FilterInvocation`) and
//! compiled once into [`Filter`]; a compiled [`Pipeline`] runs them in
//! order and stops at the first failure.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::sync::LazyLock;
use url::Url;

use crate::error::{Error, Result};
use crate::query::{element_text, parent_element, Extract};
use crate::value::{FieldValue, Value};

/// Layouts tried by `parseTime` when none is given.
pub const DEFAULT_TIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"];

static SIZE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.,]+)\s*([A-Za-z]*)$").unwrap());

static PLACEHOLDER_BASE: LazyLock<Url> =
    LazyLock::new(|| Url::parse("http://localhost/").unwrap());

/// A filter as it appears in a site definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Json>,
}

impl FilterInvocation {
    pub fn new(name: &str, args: Vec<Json>) -> Self {
        Self {
            name: name.to_string(),
            args,
        }
    }
}

/// Per-call settings the filters read.
#[derive(Debug, Clone)]
pub struct FilterContext<'c> {
    /// How a matched node becomes a string.
    pub extract: &'c Extract,
    /// The site's timezone offset.
    pub offset: FixedOffset,
}

/// A compiled filter.
#[derive(Debug, Clone)]
pub enum Filter {
    Regex(Regex),
    Index(usize),
    ParseNumber,
    ParseSize,
    ParseTime(Option<String>),
    QueryString(String),
    ParentText,
    Trim,
    Lowercase,
    Uppercase,
    Replace(String, String),
    Split(String, usize),
}

impl Filter {
    /// Compile one invocation; unknown names and bad args fail here.
    pub fn compile(invocation: &FilterInvocation) -> Result<Self> {
        let name = invocation.name.as_str();
        let args = &invocation.args;
        let filter = match name {
            "regex" => {
                let pattern = arg_str(name, args, 0)?;
                Filter::Regex(Regex::new(pattern).map_err(|e| Error::InvalidRegex {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?)
            }
            "index" => Filter::Index(arg_usize(name, args, 0)?),
            "parseNumber" => Filter::ParseNumber,
            "parseSize" => Filter::ParseSize,
            "parseTime" => Filter::ParseTime(match args.first() {
                Some(_) => Some(arg_str(name, args, 0)?.to_string()),
                None => None,
            }),
            "querystring" => Filter::QueryString(arg_str(name, args, 0)?.to_string()),
            "parentText" => Filter::ParentText,
            "trim" => Filter::Trim,
            "lowercase" => Filter::Lowercase,
            "uppercase" => Filter::Uppercase,
            "replace" => Filter::Replace(
                arg_str(name, args, 0)?.to_string(),
                arg_str(name, args, 1)?.to_string(),
            ),
            "split" => Filter::Split(arg_str(name, args, 0)?.to_string(), arg_usize(name, args, 1)?),
            other => return Err(Error::UnknownFilter(other.to_string())),
        };
        Ok(filter)
    }

    /// Catalogue name of this filter.
    pub fn name(&self) -> &'static str {
        match self {
            Filter::Regex(_) => "regex",
            Filter::Index(_) => "index",
            Filter::ParseNumber => "parseNumber",
            Filter::ParseSize => "parseSize",
            Filter::ParseTime(_) => "parseTime",
            Filter::QueryString(_) => "querystring",
            Filter::ParentText => "parentText",
            Filter::Trim => "trim",
            Filter::Lowercase => "lowercase",
            Filter::Uppercase => "uppercase",
            Filter::Replace(..) => "replace",
            Filter::Split(..) => "split",
        }
    }

    /// Apply to one value. The error is a human-readable reason.
    pub fn apply<'a>(&self, value: Value<'a>, ctx: &FilterContext<'_>) -> std::result::Result<Value<'a>, String> {
        match self {
            Filter::ParentText => match value {
                Value::Node(el) => parent_element(el)
                    .map(|p| Value::Text(element_text(p)))
                    .ok_or_else(|| "matched element has no parent".to_string()),
                other => Err(format!("parentText needs a matched element, got {}", other.kind())),
            },
            Filter::Index(n) => match value {
                Value::List(mut items) if *n < items.len() => Ok(Value::Text(items.swap_remove(*n))),
                Value::List(items) => Err(format!("index {n} out of range for {} items", items.len())),
                other => Err(format!("index needs a list, got {}", other.kind())),
            },
            _ => {
                let text = value.into_text(ctx.extract)?;
                self.apply_text(text, ctx)
            }
        }
    }

    fn apply_text<'a>(&self, text: String, ctx: &FilterContext<'_>) -> std::result::Result<Value<'a>, String> {
        match self {
            Filter::Regex(re) => apply_regex(re, &text),
            Filter::ParseNumber => parse_number(&text).map(Value::Number),
            Filter::ParseSize => parse_size(&text).map(Value::Size),
            Filter::ParseTime(layout) => {
                parse_time(&text, layout.as_deref(), ctx.offset).map(Value::Time)
            }
            Filter::QueryString(param) => query_param(&text, param)
                .map(Value::Text)
                .ok_or_else(|| format!("no {param:?} parameter in {text:?}")),
            Filter::Trim => Ok(Value::Text(text.trim().to_string())),
            Filter::Lowercase => Ok(Value::Text(text.to_lowercase())),
            Filter::Uppercase => Ok(Value::Text(text.to_uppercase())),
            Filter::Replace(from, to) => Ok(Value::Text(text.replace(from.as_str(), to))),
            Filter::Split(sep, n) => text
                .split(sep.as_str())
                .nth(*n)
                .map(|s| Value::Text(s.trim().to_string()))
                .ok_or_else(|| format!("no part {n} after splitting on {sep:?}")),
            // Handled in apply
            Filter::ParentText | Filter::Index(_) => unreachable!("non-text filter"),
        }
    }
}

/// An ordered filter sequence for one field.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    filters: Vec<Filter>,
}

impl Pipeline {
    pub fn compile(invocations: &[FilterInvocation]) -> Result<Self> {
        let filters = invocations.iter().map(Filter::compile).collect::<Result<Vec<_>>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run `seed` through every filter; the first failure is attributed to `field`.
    pub fn run(&self, field: &str, seed: Value<'_>, ctx: &FilterContext<'_>) -> Result<FieldValue> {
        let mut value = seed;
        for filter in &self.filters {
            value = filter.apply(value, ctx).map_err(|reason| Error::FilterFailure {
                field: field.to_string(),
                filter: filter.name().to_string(),
                reason,
            })?;
        }
        value.finish(ctx.extract).map_err(|reason| Error::FilterFailure {
            field: field.to_string(),
            filter: "output".to_string(),
            reason,
        })
    }
}

fn apply_regex<'a>(re: &Regex, text: &str) -> std::result::Result<Value<'a>, String> {
    let caps = re
        .captures(text)
        .ok_or_else(|| format!("pattern {:?} did not match", re.as_str()))?;

    match caps.len() {
        1 | 2 => caps
            .get(caps.len() - 1)
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(|| format!("pattern {:?} captured an empty value", re.as_str())),
        _ => Ok(Value::List(
            caps.iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect(),
        )),
    }
}

/// Parse locale-formatted numeric text. `∞` and `Inf` are positive infinity.
pub fn parse_number(text: &str) -> std::result::Result<f64, String> {
    let t = text.trim();
    if matches!(t, "∞" | "Inf" | "inf" | "+Inf" | "Infinity" | "infinity") {
        return Ok(f64::INFINITY);
    }

    let cleaned: String = t
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\u{a0}' | '_'))
        .collect();

    cleaned
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("not a number: {t:?}"))
}

/// Parse a human-readable byte quantity (1024-based) into bytes.
pub fn parse_size(text: &str) -> std::result::Result<u64, String> {
    let t = text.trim();
    let caps = SIZE_PATTERN
        .captures(t)
        .ok_or_else(|| format!("not a size: {t:?}"))?;

    let number: f64 = caps[1]
        .replace(',', "")
        .parse()
        .map_err(|_| format!("not a size: {t:?}"))?;

    let exponent = match caps[2].to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        "P" | "PB" | "PIB" => 5,
        unit => return Err(format!("unknown size unit {unit:?}")),
    };

    Ok((number * 1024f64.powi(exponent)).round() as u64)
}

/// Parse a local timestamp in the site's offset.
pub fn parse_time(
    text: &str,
    layout: Option<&str>,
    offset: FixedOffset,
) -> std::result::Result<DateTime<FixedOffset>, String> {
    let t = text.trim();
    let layouts: Vec<&str> = match layout {
        Some(l) => vec![l],
        None => DEFAULT_TIME_LAYOUTS.to_vec(),
    };

    for layout in &layouts {
        let naive = NaiveDateTime::parse_from_str(t, layout).ok().or_else(|| {
            NaiveDate::parse_from_str(t, layout)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
        if let Some(naive) = naive {
            if let Some(instant) = offset.from_local_datetime(&naive).single() {
                return Ok(instant);
            }
        }
    }

    Err(format!("{t:?} does not match {}", layouts.join(" | ")))
}

/// Read one query parameter from an absolute or relative link.
pub fn query_param(link: &str, name: &str) -> Option<String> {
    let link = link.trim();
    let url = Url::parse(link)
        .or_else(|_| PLACEHOLDER_BASE.join(link))
        .ok()?;

    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn arg_str<'j>(filter: &str, args: &'j [Json], i: usize) -> Result<&'j str> {
    args.get(i)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::InvalidFilterArgs {
            filter: filter.to_string(),
            reason: format!("argument {i} must be a string"),
        })
}

fn arg_usize(filter: &str, args: &[Json], i: usize) -> Result<usize> {
    let arg = args.get(i);
    arg.and_then(Json::as_u64)
        .map(|n| n as usize)
        .or_else(|| arg.and_then(Json::as_str).and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| Error::InvalidFilterArgs {
            filter: filter.to_string(),
            reason: format!("argument {i} must be a non-negative integer"),
        })
}
