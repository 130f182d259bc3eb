//! Encoding of single WARC records as standalone gzip members.
//!
//! Each record is compressed on its own so that a member can be located by
//! `(offset, length)` and decompressed without touching its neighbours.

use std::collections::HashMap;
use std::io::{BufReader, Read, Write};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use warc::{RecordBuilder, RecordType, WarcHeader, WarcReader, WarcWriter};

use super::WarcStoreError;

/// Header carrying the caller's tag on every stored record.
pub const TAG_HEADER: &str = "WARC-Serp-Tag";

/// A decoded record read back from a container.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub record_id: Option<String>,
    pub warc_type: Option<String>,
    pub target_uri: Option<String>,
    pub tag: Option<String>,
    /// Record block: the raw HTTP message for request/response records.
    pub content: Vec<u8>,
}

impl StoredRecord {
    /// Split an HTTP response block into status code, headers and body.
    pub fn http_response(&self) -> Option<HttpMessage<'_>> {
        parse_http_message(&self.content)
    }
}

/// A parsed HTTP message borrowed from a record block.
#[derive(Debug)]
pub struct HttpMessage<'a> {
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: &'a [u8],
}

impl HttpMessage<'_> {
    /// MIME type without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }
}

/// Parse an HTTP message: header block, blank line, body.
pub fn parse_http_message(data: &[u8]) -> Option<HttpMessage<'_>> {
    let separator = b"\r\n\r\n";
    let sep_pos = data.windows(separator.len()).position(|w| w == separator)?;

    let header_str = std::str::from_utf8(&data[..sep_pos]).ok()?;
    let mut lines = header_str.lines();

    // "HTTP/1.1 200 OK"
    let status_line = lines.next()?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok());

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    Some(HttpMessage {
        status,
        headers,
        body: &data[sep_pos + separator.len()..],
    })
}

/// Header names are case-insensitive; the parser lowercases unknown ones.
fn tag_header() -> WarcHeader {
    WarcHeader::from(TAG_HEADER)
}

pub(crate) fn new_record_id() -> String {
    format!("<urn:uuid:{}>", Uuid::new_v4())
}

pub(crate) struct RecordSpec<'a> {
    pub record_id: &'a str,
    pub warc_type: RecordType,
    pub target_uri: &'a str,
    pub date: DateTime<Utc>,
    pub tag: &'a str,
    pub concurrent_to: Option<&'a str>,
    pub content_type: &'a str,
    pub content: Vec<u8>,
}

/// Serialize one record and wrap it in its own gzip member.
pub(crate) fn encode_member(spec: RecordSpec<'_>) -> Result<Vec<u8>, WarcStoreError> {
    let mut builder = RecordBuilder::default()
        .warc_id(spec.record_id.to_string())
        .warc_type(spec.warc_type)
        .date(spec.date)
        .header(WarcHeader::TargetURI, spec.target_uri)
        .header(WarcHeader::ContentType, spec.content_type)
        .header(tag_header(), spec.tag)
        .body(spec.content);
    if let Some(concurrent) = spec.concurrent_to {
        builder = builder.header(WarcHeader::ConcurrentTo, concurrent);
    }
    let record = builder
        .build()
        .map_err(|e| WarcStoreError::Malformed(e.to_string()))?;

    let mut raw = Vec::new();
    {
        let mut writer = WarcWriter::new(&mut raw);
        writer.write(&record)?;
    }

    let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
    encoder.write_all(&raw)?;
    Ok(encoder.finish().into_result()?)
}

/// Decompress one gzip member and parse the single record inside.
pub(crate) fn decode_member(bytes: &[u8]) -> Result<StoredRecord, WarcStoreError> {
    let mut decoder = libflate::gzip::Decoder::new(bytes)?;
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw)?;

    let reader = WarcReader::new(BufReader::new(raw.as_slice()));
    let record = reader
        .iter_records()
        .next()
        .ok_or_else(|| WarcStoreError::Malformed("no record in member".to_string()))?
        .map_err(|e| WarcStoreError::Malformed(e.to_string()))?;

    let header = |h: WarcHeader| record.header(h).map(|v| v.to_string());
    Ok(StoredRecord {
        record_id: header(WarcHeader::RecordID),
        warc_type: header(WarcHeader::WarcType),
        target_uri: header(WarcHeader::TargetURI),
        tag: header(tag_header()),
        content: record.body().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_decodes_to_same_record() {
        let id = new_record_id();
        let member = encode_member(RecordSpec {
            record_id: &id,
            warc_type: RecordType::Response,
            target_uri: "https://example.com/search?q=rust",
            date: Utc::now(),
            tag: "serp-1",
            concurrent_to: None,
            content_type: "application/http; msgtype=response",
            content: b"HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<html></html>".to_vec(),
        })
        .unwrap();
        assert_eq!(&member[..2], &[0x1f, 0x8b]);

        let record = decode_member(&member).unwrap();
        assert_eq!(record.tag.as_deref(), Some("serp-1"));
        assert_eq!(record.target_uri.as_deref(), Some("https://example.com/search?q=rust"));
        let http = record.http_response().unwrap();
        assert_eq!(http.status, Some(200));
        assert_eq!(http.content_type(), Some("text/html"));
        assert_eq!(http.body, b"<html></html>");
    }

    #[test]
    fn tag_survives_a_reread_of_the_raw_member() {
        let id = new_record_id();
        let member = encode_member(RecordSpec {
            record_id: &id,
            warc_type: RecordType::Request,
            target_uri: "https://example.com/",
            date: Utc::now(),
            tag: "Mixed-Case-Tag",
            concurrent_to: Some("<urn:uuid:00000000-0000-0000-0000-000000000000>"),
            content_type: "application/http; msgtype=request",
            content: b"GET / HTTP/1.1\r\n\r\n".to_vec(),
        })
        .unwrap();

        let mut raw = String::new();
        libflate::gzip::Decoder::new(member.as_slice())
            .unwrap()
            .read_to_string(&mut raw)
            .unwrap();
        assert!(raw.to_ascii_lowercase().contains("warc-serp-tag: mixed-case-tag"));

        let record = decode_member(&member).unwrap();
        assert_eq!(record.tag.as_deref(), Some("Mixed-Case-Tag"));
        assert_eq!(record.warc_type.as_deref(), Some("request"));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_member(b"not gzip").is_err());
    }
}
