//! Document queries
//!
//! Wraps `scraper` selectors and adds the `:contains('text')` pseudo-class
//! that tracker site configurations use to anchor on row labels, e.g.
//! `td.rowhead:contains('等级') + td`.
//!
//! A `:contains` alternative may be followed by one combinator (`+`, `~`,
//! `>` or whitespace) and a simple compound selector. Selector lists mix
//! freely; matches are always returned in document order.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CONTAINS: &str = ":contains(";

/// A compiled query expression.
#[derive(Debug, Clone)]
pub struct Query {
    source: String,
    /// Set when every alternative is plain CSS, so scraper can do the walk.
    combined: Option<Selector>,
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone)]
enum Alternative {
    Css(Selector),
    Contains {
        anchor: Selector,
        needle: String,
        tail: Option<(Combinator, Selector)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Adjacent,
    Sibling,
    Child,
    Descendant,
}

impl Query {
    /// Compile a query expression.
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.is_empty() {
            return Err(invalid(source, "empty query"));
        }

        let alternatives = split_outside_quotes(source, ',')
            .into_iter()
            .map(|alt| parse_alternative(alt.trim(), source))
            .collect::<Result<Vec<_>>>()?;

        let combined = if alternatives.iter().all(|a| matches!(a, Alternative::Css(_))) {
            Some(parse_css(source, source)?)
        } else {
            None
        };

        Ok(Self {
            source: source.to_string(),
            combined,
            alternatives,
        })
    }

    /// The expression this query was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All matching elements of the document, in document order.
    pub fn select<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        match &self.combined {
            Some(selector) => document.select(selector).collect(),
            None => document
                .root_element()
                .descendants()
                .filter_map(ElementRef::wrap)
                .filter(|el| self.matches(*el))
                .collect(),
        }
    }

    /// Matching descendants of `scope` (excluding `scope` itself).
    pub fn select_in<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match &self.combined {
            Some(selector) => scope.select(selector).collect(),
            None => scope
                .descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .filter(|el| self.matches(*el))
                .collect(),
        }
    }

    /// First matching element of the document.
    pub fn first<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        match &self.combined {
            Some(selector) => document.select(selector).next(),
            None => document
                .root_element()
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|el| self.matches(*el)),
        }
    }

    /// First matching descendant of `scope`.
    pub fn first_in<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.select_in(scope).into_iter().next()
    }

    /// Whether `element` itself matches any alternative.
    pub fn matches(&self, element: ElementRef<'_>) -> bool {
        self.alternatives.iter().any(|alt| alt.matches(element))
    }
}

impl Alternative {
    fn matches(&self, el: ElementRef<'_>) -> bool {
        match self {
            Alternative::Css(selector) => selector.matches(&el),
            Alternative::Contains {
                anchor,
                needle,
                tail: None,
            } => anchored(anchor, needle, el),
            Alternative::Contains {
                anchor,
                needle,
                tail: Some((combinator, selector)),
            } => {
                if !selector.matches(&el) {
                    return false;
                }
                let hit = |candidate: ElementRef<'_>| anchored(anchor, needle, candidate);
                match combinator {
                    Combinator::Adjacent => el
                        .prev_siblings()
                        .find_map(ElementRef::wrap)
                        .is_some_and(hit),
                    Combinator::Sibling => el.prev_siblings().filter_map(ElementRef::wrap).any(hit),
                    Combinator::Child => parent_element(el).is_some_and(hit),
                    Combinator::Descendant => el.ancestors().filter_map(ElementRef::wrap).any(hit),
                }
            }
        }
    }
}

fn anchored(anchor: &Selector, needle: &str, el: ElementRef<'_>) -> bool {
    anchor.matches(&el) && el.text().collect::<String>().contains(needle)
}

fn parse_alternative(src: &str, whole: &str) -> Result<Alternative> {
    let Some(pos) = find_outside_quotes(src, CONTAINS) else {
        return Ok(Alternative::Css(parse_css(src, whole)?));
    };

    let anchor_src = match src[..pos].trim() {
        "" => "*",
        s => s,
    };
    let anchor = parse_css(anchor_src, whole)?;

    let after = &src[pos + CONTAINS.len()..];
    let close = find_outside_quotes(after, ")")
        .ok_or_else(|| invalid(whole, "unterminated :contains("))?;
    let needle = unquote(after[..close].trim()).to_string();
    let rest = &after[close + 1..];

    let tail = if rest.trim().is_empty() {
        None
    } else {
        let trimmed = rest.trim_start();
        let (combinator, tail_src) = match trimmed.chars().next() {
            Some('+') => (Combinator::Adjacent, trimmed[1..].trim()),
            Some('~') => (Combinator::Sibling, trimmed[1..].trim()),
            Some('>') => (Combinator::Child, trimmed[1..].trim()),
            _ if rest.starts_with(char::is_whitespace) => (Combinator::Descendant, trimmed),
            _ => return Err(invalid(whole, "only a combinator may follow :contains()")),
        };
        if tail_src.is_empty()
            || [" ", ">", "+", "~", CONTAINS]
                .iter()
                .any(|tok| find_outside_quotes(tail_src, tok).is_some())
        {
            return Err(invalid(
                whole,
                "the selector after :contains() must be a simple compound selector",
            ));
        }
        Some((combinator, parse_css(tail_src, whole)?))
    };

    Ok(Alternative::Contains {
        anchor,
        needle,
        tail,
    })
}

fn parse_css(src: &str, whole: &str) -> Result<Selector> {
    Selector::parse(src).map_err(|e| invalid(whole, &e.to_string()))
}

fn invalid(selector: &str, reason: &str) -> Error {
    Error::InvalidSelector {
        selector: selector.to_string(),
        reason: reason.to_string(),
    }
}

fn unquote(s: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Byte offset of `needle` in `haystack`, skipping quoted and bracketed text.
fn find_outside_quotes(haystack: &str, needle: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (i, c) in haystack.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => {
                if depth == 0 && haystack[i..].starts_with(needle) {
                    return Some(i);
                }
                match c {
                    '\'' | '"' => quote = Some(c),
                    '[' | '(' => depth += 1,
                    ']' | ')' => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
        }
    }
    None
}

fn split_outside_quotes(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = s;
    let sep = sep.to_string();
    while let Some(pos) = find_outside_quotes(rest, &sep) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + sep.len()..];
    }
    parts.push(rest);
    parts
}

/// How a raw string is read off a matched element.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Extract {
    /// Trimmed text content.
    #[default]
    Text,
    /// Inner HTML.
    Html,
    /// A named attribute.
    Attr(String),
}

impl Extract {
    /// Parse an accessor: `text`, `html`, `attr:<name>` or a bare attribute name.
    pub fn from_accessor(accessor: &str) -> Self {
        match accessor.trim() {
            "" | "text" => Extract::Text,
            "html" => Extract::Html,
            other => Extract::Attr(other.strip_prefix("attr:").unwrap_or(other).to_string()),
        }
    }

    /// Read the raw value off an element. `None` when the attribute is absent.
    pub fn apply(&self, element: ElementRef<'_>) -> Option<String> {
        match self {
            Extract::Text => Some(element_text(element)),
            Extract::Html => Some(element.inner_html()),
            Extract::Attr(name) => element.value().attr(name).map(String::from),
        }
    }
}

impl From<String> for Extract {
    fn from(s: String) -> Self {
        Extract::from_accessor(&s)
    }
}

impl From<Extract> for String {
    fn from(e: Extract) -> Self {
        match e {
            Extract::Text => "text".to_string(),
            Extract::Html => "html".to_string(),
            Extract::Attr(name) => format!("attr:{name}"),
        }
    }
}

/// Trimmed text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// The parent of an element, if it is an element.
pub fn parent_element(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.parent().and_then(ElementRef::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROWS: &str = r#"
    <html><body>
        <table>
            <tr><td class="rowhead">注册日期</td><td align="left">2019-09-03 23:02:35</td></tr>
            <tr><td class="rowhead">等级</td><td align="left">PetaByte</td></tr>
        </table>
        <div class="box"><p>Seeding <span class="n">10</span></p></div>
    </body></html>
    "#;

    #[test]
    fn test_plain_css() {
        let doc = Html::parse_document(ROWS);
        let q = Query::parse("td.rowhead").unwrap();
        assert_eq!(q.select(&doc).len(), 2);
        assert_eq!(element_text(q.first(&doc).unwrap()), "注册日期");
    }

    #[test]
    fn test_contains_adjacent() {
        let doc = Html::parse_document(ROWS);
        let q = Query::parse("td.rowhead:contains('等级') + td").unwrap();
        let hits = q.select(&doc);
        assert_eq!(hits.len(), 1);
        assert_eq!(element_text(hits[0]), "PetaByte");
    }

    #[test]
    fn test_contains_without_tail() {
        let doc = Html::parse_document(ROWS);
        let q = Query::parse("p:contains(\"Seeding\")").unwrap();
        assert_eq!(element_text(q.first(&doc).unwrap()), "Seeding 10");
    }

    #[test]
    fn test_contains_descendant_and_child() {
        let doc = Html::parse_document(ROWS);
        let q = Query::parse("div:contains('Seeding') span.n").unwrap();
        assert_eq!(element_text(q.first(&doc).unwrap()), "10");
        let q = Query::parse("p:contains('Seeding') > span").unwrap();
        assert_eq!(element_text(q.first(&doc).unwrap()), "10");
    }

    #[test]
    fn test_mixed_list_keeps_document_order() {
        let doc = Html::parse_document(ROWS);
        let q = Query::parse("span.n, td.rowhead:contains('注册') + td").unwrap();
        let texts: Vec<String> = q.select(&doc).into_iter().map(element_text).collect();
        assert_eq!(texts, vec!["2019-09-03 23:02:35", "10"]);
    }

    #[test]
    fn test_invalid_queries() {
        assert!(matches!(Query::parse(""), Err(Error::InvalidSelector { .. })));
        assert!(Query::parse("td[").is_err());
        assert!(Query::parse("td:contains('x') + td span").is_err());
        assert!(Query::parse("td:contains('x').cls").is_err());
    }

    #[test]
    fn test_select_in_scope() {
        let doc = Html::parse_document(ROWS);
        let table = Query::parse("table").unwrap().first(&doc).unwrap();
        let q = Query::parse("td:contains('等级') + td").unwrap();
        assert_eq!(element_text(q.first_in(table).unwrap()), "PetaByte");
    }

    #[test]
    fn test_extract_accessors() {
        let html = r#"<a class="u" href="userdetails.php?id=7"><b>alice</b></a>"#;
        let doc = Html::parse_document(html);
        let a = Query::parse("a.u").unwrap().first(&doc).unwrap();

        assert_eq!(Extract::from_accessor("").apply(a), Some("alice".to_string()));
        assert_eq!(Extract::from_accessor("html").apply(a), Some("<b>alice</b>".to_string()));
        assert_eq!(
            Extract::from_accessor("attr:href").apply(a),
            Some("userdetails.php?id=7".to_string())
        );
        assert_eq!(Extract::from_accessor("href"), Extract::Attr("href".to_string()));
        assert_eq!(Extract::from_accessor("title").apply(a), None);
    }

    #[test]
    fn test_parent_element() {
        let doc = Html::parse_document(ROWS);
        let span = Query::parse("span.n").unwrap().first(&doc).unwrap();
        let parent = parent_element(span).unwrap();
        assert_eq!(parent.value().name(), "p");
    }
}
