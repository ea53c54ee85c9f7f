//! FFI interface for C/C++ hosts
//!
//! Every input and output crosses the boundary as UTF-8 JSON. Results are
//! owned by Rust and must be released with `tp_free_result`.

use scraper::Html;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::{c_char, CStr, CString};
use std::ptr;
use std::sync::LazyLock;

use crate::discount::detect_discount;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::selector::{FieldSelector, FieldSet};
use crate::site::parse_offset;
use crate::value::FieldValue;

static BUILTIN: LazyLock<std::result::Result<Registry, Error>> = LazyLock::new(Registry::builtin);

/// Result struct returned to the host.
/// Exactly one pointer is non-null.
#[repr(C)]
pub struct ExtractionResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct FieldsResponse {
    values: BTreeMap<String, FieldValue>,
    errors: BTreeMap<String, String>,
}

/// Resolve a set of field selectors against one document.
///
/// `selectors_json` is an object of field name → selector config.
/// `timezone` (`+0800` style) may be null for UTC. The result is
/// `{"values": {...}, "errors": {...}}`.
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `selectors_json` must be a valid null-terminated C string
/// - `timezone` must be null or a valid null-terminated C string
/// - Caller must free the result via `tp_free_result`
#[no_mangle]
pub unsafe extern "C" fn tp_extract_fields(
    html_ptr: *const c_char,
    html_len: usize,
    selectors_json: *const c_char,
    timezone: *const c_char,
) -> ExtractionResultFFI {
    let run = || -> Result<FieldsResponse> {
        let html = html_arg(html_ptr, html_len)?;
        let selectors: BTreeMap<String, FieldSelector> =
            serde_json::from_str(str_arg(selectors_json, "selectors")?)?;
        let offset = match opt_str_arg(timezone, "timezone")? {
            Some(tz) => parse_offset(tz)?,
            None => parse_offset("+0000")?,
        };

        let fields = FieldSet::compile(&selectors, offset)?;
        let extraction = fields.extract::<&str>(&Html::parse_document(html), None);
        Ok(FieldsResponse {
            values: extraction.values,
            errors: extraction
                .errors
                .into_iter()
                .map(|(field, err)| (field, err.to_string()))
                .collect(),
        })
    };
    into_ffi(run())
}

/// Detect the discount on a detail page using a built-in site's strategy.
/// The result is `{"level": ..., "endTime": ...}`.
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `site_id` must be a valid null-terminated C string
/// - Caller must free the result via `tp_free_result`
#[no_mangle]
pub unsafe extern "C" fn tp_detect_discount(
    html_ptr: *const c_char,
    html_len: usize,
    site_id: *const c_char,
) -> ExtractionResultFFI {
    let run = || -> Result<_> {
        let html = html_arg(html_ptr, html_len)?;
        let site_id = str_arg(site_id, "site id")?;
        let registry = BUILTIN.as_ref().map_err(Clone::clone)?;
        let strategy = registry.discount_strategy(site_id)?;
        Ok(detect_discount(&Html::parse_document(html), strategy.as_ref()))
    };
    into_ffi(run())
}

/// Free a result returned by any `tp_*` function.
///
/// # Safety
/// - `result` must have been returned by this library
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn tp_free_result(result: ExtractionResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

unsafe fn html_arg<'a>(ptr: *const c_char, len: usize) -> Result<&'a str> {
    if ptr.is_null() || len == 0 {
        return Ok("");
    }
    let slice = std::slice::from_raw_parts(ptr as *const u8, len);
    std::str::from_utf8(slice).map_err(|_| Error::Parse("invalid UTF-8 in HTML content".to_string()))
}

unsafe fn str_arg<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    opt_str_arg(ptr, what)?.ok_or_else(|| Error::Parse(format!("{what} is null")))
}

unsafe fn opt_str_arg<'a>(ptr: *const c_char, what: &str) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| Error::Parse(format!("invalid UTF-8 in {what}")))
}

fn into_ffi<T: Serialize>(result: Result<T>) -> ExtractionResultFFI {
    let json = result.and_then(|value| Ok(serde_json::to_string(&value)?));
    match json {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => ExtractionResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&e.to_string()),
    }
}

fn make_error_result(msg: &str) -> ExtractionResultFFI {
    let error = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    ExtractionResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take(result: ExtractionResultFFI) -> std::result::Result<serde_json::Value, String> {
        let out = unsafe {
            if result.error_ptr.is_null() {
                let json = CStr::from_ptr(result.json_ptr).to_str().unwrap();
                Ok(serde_json::from_str(json).unwrap())
            } else {
                Err(CStr::from_ptr(result.error_ptr).to_string_lossy().into_owned())
            }
        };
        unsafe { tp_free_result(result) };
        out
    }

    #[test]
    fn test_extract_fields() {
        let html = r#"<a href="userdetails.php?id=151907">alice</a>"#;
        let selectors = CString::new(
            r#"{
                "id": {"selector": "a", "attr": "href", "filters": [{"name": "querystring", "args": ["id"]}]},
                "name": {"selector": ["a"]},
                "missing": {"selector": ["span.none"]}
            }"#,
        )
        .unwrap();
        let tz = CString::new("+0800").unwrap();

        let json = take(unsafe {
            tp_extract_fields(html.as_ptr() as *const c_char, html.len(), selectors.as_ptr(), tz.as_ptr())
        })
        .unwrap();
        assert_eq!(json["values"]["id"], "151907");
        assert_eq!(json["values"]["name"], "alice");
        assert!(json["errors"]["missing"].as_str().unwrap().contains("missing"));
    }

    #[test]
    fn test_extract_fields_bad_config() {
        let html = "<p></p>";
        let selectors = CString::new(r#"{"x": {"selector": "p", "filters": [{"name": "nope"}]}}"#).unwrap();
        let err = take(unsafe {
            tp_extract_fields(html.as_ptr() as *const c_char, html.len(), selectors.as_ptr(), ptr::null())
        })
        .unwrap_err();
        assert!(err.contains("nope"));
    }

    #[test]
    fn test_detect_discount() {
        let html = r#"<img src="/pic/ico_free.gif"><font color="red">到期时间为2026-01-30 16:32</font>"#;
        let site = CString::new("ttg").unwrap();
        let json = take(unsafe { tp_detect_discount(html.as_ptr() as *const c_char, html.len(), site.as_ptr()) })
            .unwrap();
        assert_eq!(json["level"], "free");
        assert_eq!(json["endTime"], "2026-01-30T16:32:00+08:00");
    }

    #[test]
    fn test_detect_discount_unknown_site() {
        let site = CString::new("nowhere").unwrap();
        let err = take(unsafe { tp_detect_discount(ptr::null(), 0, site.as_ptr()) }).unwrap_err();
        assert!(err.contains("nowhere"));
    }
}
