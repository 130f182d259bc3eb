//! CDX query construction and response parsing.
//!
//! Both response shapes are accepted: the array-of-arrays form whose first
//! row names the columns, and newline-delimited JSON objects. A resume key
//! arrives either as a single-element row after an empty row (array form)
//! or as a `{"resumeKey": ...}` line (NDJSON form).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use super::{CaptureRecord, MatchType, TimeRange};

/// Builder for CDX API query URLs.
#[derive(Debug, Clone)]
pub struct CdxQuery {
    base_url: String,
    url_pattern: String,
    match_type: Option<MatchType>,
    from_date: Option<String>,
    to_date: Option<String>,
    limit: Option<usize>,
    page: Option<u64>,
    show_num_pages: bool,
    show_resume_key: bool,
    resume_key: Option<String>,
}

impl CdxQuery {
    pub fn new(base_url: impl Into<String>, url_pattern: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            url_pattern: url_pattern.into(),
            match_type: None,
            from_date: None,
            to_date: None,
            limit: None,
            page: None,
            show_num_pages: false,
            show_resume_key: false,
            resume_key: None,
        }
    }

    pub fn match_type(mut self, mt: MatchType) -> Self {
        self.match_type = Some(mt);
        self
    }

    /// Restrict to a capture time window.
    pub fn time_range(mut self, range: Option<&TimeRange>) -> Self {
        if let Some(range) = range {
            self.from_date = range.from.map(format_cdx_timestamp);
            self.to_date = range.to.map(format_cdx_timestamp);
        }
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// Ask for the page count instead of rows.
    pub fn show_num_pages(mut self) -> Self {
        self.show_num_pages = true;
        self
    }

    pub fn show_resume_key(mut self) -> Self {
        self.show_resume_key = true;
        self
    }

    pub fn resume_key(mut self, key: impl Into<String>) -> Self {
        self.resume_key = Some(key.into());
        self
    }

    /// Build the final CDX API URL.
    pub fn build(&self) -> String {
        // Encode the URL pattern but preserve CDX wildcard characters (*).
        let encoded_pattern = urlencoding::encode(&self.url_pattern).replace("%2A", "*");
        let mut url = format!("{}?url={}&output=json", self.base_url, encoded_pattern);

        if let Some(mt) = self.match_type {
            url.push_str(&format!("&matchType={}", mt.as_str()));
        }
        if let Some(ref from) = self.from_date {
            url.push_str(&format!("&from={}", from));
        }
        if let Some(ref to) = self.to_date {
            url.push_str(&format!("&to={}", to));
        }
        if let Some(n) = self.limit {
            if n > 0 {
                url.push_str(&format!("&limit={}", n));
            }
        }
        if self.show_num_pages {
            url.push_str("&showNumPages=true");
        }
        if let Some(page) = self.page {
            url.push_str(&format!("&page={}", page));
        }
        if self.show_resume_key {
            url.push_str("&showResumeKey=true");
        }
        if let Some(ref key) = self.resume_key {
            url.push_str(&format!("&resumeKey={}", urlencoding::encode(key)));
        }

        url
    }
}

/// A single row from a CDX response with named field access.
#[derive(Debug, Clone, Default)]
pub struct CdxRow {
    fields: HashMap<String, String>,
}

impl CdxRow {
    /// Get a field value by name.
    ///
    /// Returns `None` for missing fields and CDX null markers (`"-"`).
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(|s| s.as_str())
            .filter(|s| *s != "-" && !s.is_empty())
    }

    /// First present field among aliases.
    pub fn get_any(&self, fields: &[&str]) -> Option<&str> {
        fields.iter().find_map(|f| self.get(f))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }
}

/// Rows of one response plus the continuation token, if any.
#[derive(Debug, Clone, Default)]
pub struct CdxBody {
    pub rows: Vec<CdxRow>,
    pub resume_key: Option<String>,
}

/// Parse a CDX response body in either shape.
pub fn parse_cdx_body(body: &str) -> Result<CdxBody, String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(CdxBody::default());
    }
    if trimmed.starts_with('[') {
        parse_array_body(trimmed)
    } else {
        parse_ndjson_body(trimmed)
    }
}

fn parse_array_body(body: &str) -> Result<CdxBody, String> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body).map_err(|e| e.to_string())?;

    let mut iter = rows.into_iter();
    let headers: Vec<String> = match iter.next() {
        Some(h) if !h.is_empty() => h.iter().map(value_to_string).collect(),
        _ => return Ok(CdxBody::default()),
    };

    let mut out = CdxBody::default();
    let mut after_separator = false;
    for row in iter {
        if row.is_empty() {
            after_separator = true;
            continue;
        }
        if after_separator && row.len() == 1 {
            out.resume_key = Some(value_to_string(&row[0]));
            continue;
        }
        let fields = headers
            .iter()
            .cloned()
            .zip(row.iter().map(value_to_string))
            .collect();
        out.rows.push(CdxRow { fields });
    }
    Ok(out)
}

fn parse_ndjson_body(body: &str) -> Result<CdxBody, String> {
    let mut out = CdxBody::default();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let object: serde_json::Map<String, Value> =
            serde_json::from_str(line).map_err(|e| format!("{}: {}", e, line))?;
        if let Some(key) = object.get("resumeKey").or_else(|| object.get("resume_key")) {
            if object.len() == 1 {
                out.resume_key = Some(value_to_string(key));
                continue;
            }
        }
        let fields = object
            .iter()
            .map(|(k, v)| (k.clone(), value_to_string(v)))
            .collect();
        out.rows.push(CdxRow { fields });
    }
    Ok(out)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Parse a `showNumPages` response: a bare integer or an object with `pages`.
pub fn parse_page_count(body: &str) -> Result<u64, String> {
    let trimmed = body.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    value
        .get("pages")
        .and_then(Value::as_u64)
        .or_else(|| value.as_u64())
        .ok_or_else(|| format!("unexpected page count response: {}", trimmed))
}

/// Columns the record mapping understands, including dialect aliases.
pub(crate) const KNOWN_COLUMNS: &[&str] = &[
    "urlkey",
    "timestamp",
    "original",
    "url",
    "mimetype",
    "mime",
    "statuscode",
    "status",
    "digest",
    "length",
    "offset",
    "filename",
    "redirect",
    "robotflags",
    "flags",
    "collection",
    "source",
    "source-coll",
    "source_coll",
];

/// Map a row onto a capture record. Errors name the missing or malformed field.
pub fn row_to_record(row: &CdxRow) -> Result<CaptureRecord, String> {
    let url = row
        .get_any(&["original", "url"])
        .ok_or("missing url")?
        .to_string();
    let url_key = row.get("urlkey").ok_or("missing urlkey")?.to_string();
    let raw_timestamp = row.get("timestamp").ok_or("missing timestamp")?;
    let timestamp = parse_cdx_timestamp(raw_timestamp)
        .ok_or_else(|| format!("invalid timestamp {:?}", raw_timestamp))?;
    let raw_status = row
        .get_any(&["statuscode", "status"])
        .ok_or("missing status code")?;
    let status_code = raw_status
        .parse::<u16>()
        .map_err(|_| format!("invalid status code {:?}", raw_status))?;
    let digest = row.get("digest").ok_or("missing digest")?.to_string();

    let parse_u64 = |name: &str| -> Result<Option<u64>, String> {
        row.get(name)
            .map(|v| v.parse::<u64>().map_err(|_| format!("invalid {} {:?}", name, v)))
            .transpose()
    };

    let flags = row
        .get_any(&["robotflags", "flags"])
        .map(|f| f.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();

    Ok(CaptureRecord {
        url,
        url_key,
        timestamp,
        status_code,
        digest,
        mimetype: row.get_any(&["mimetype", "mime"]).map(String::from),
        filename: row.get("filename").map(String::from),
        offset: parse_u64("offset")?,
        length: parse_u64("length")?,
        flags,
        collection: row.get("collection").map(String::from),
        source: row.get("source").map(String::from),
        source_collection: row.get_any(&["source-coll", "source_coll"]).map(String::from),
    })
}

/// Parse a CDX timestamp (`YYYYMMDDhhmmss`) into `DateTime<Utc>`.
pub fn parse_cdx_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let head = ts.get(..14)?;
    NaiveDateTime::parse_from_str(head, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Format a `DateTime<Utc>` as a CDX timestamp (`YYYYMMDDhhmmss`).
pub fn format_cdx_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%d%H%M%S").to_string()
}
