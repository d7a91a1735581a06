//! Conditional and range serving of seekable content, and file serving.
//!
//! # Design Decisions
//! - Preconditions are evaluated in the order of RFC 9110 §13.2.2
//! - Ranges are honoured only for a single satisfiable `bytes=` range;
//!   multi-range requests get the full representation
//! - Conditional and range handling only apply while the recorded status
//!   is 200; error pages are always sent in full

use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{
    HeaderValue, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, IF_MATCH,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_RANGE, IF_UNMODIFIED_SINCE, LAST_MODIFIED, RANGE,
};
use http::{Method, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::http::error::Error;
use crate::http::response::Response;

const COPY_CHUNK: usize = 32 * 1024;
const SNIFF_LEN: usize = 512;

/// Seekable content source.
pub trait Content: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> Content for T {}

/// Format `time` as an IMF-fixdate.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date into Unix seconds.
fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.timestamp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Condition {
    None,
    True,
    False,
}

#[derive(Debug, PartialEq, Eq)]
enum Precondition {
    Proceed,
    NotModified,
    Failed,
}

#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Full,
    Single { start: u64, len: u64 },
    Unsatisfiable,
}

impl Response {
    /// Serve seekable `content`, honouring conditional and range headers.
    ///
    /// `Last-Modified` and `ETag` already set on the response drive the
    /// validators. Once the head is committed the content is simply appended.
    pub async fn write_content<R: Content>(&mut self, mut content: R) -> Result<(), Error> {
        if self.written {
            if !self.is_head_request() {
                self.copy_body(&mut content, u64::MAX).await?;
            }
            return Ok(());
        }

        let size = content.seek(SeekFrom::End(0)).await?;
        content.seek(SeekFrom::Start(0)).await?;

        let negotiable = self.status == StatusCode::OK;
        if negotiable {
            match self.preconditions() {
                Precondition::Proceed => {}
                Precondition::NotModified => {
                    self.headers.remove(CONTENT_TYPE);
                    self.headers.remove(CONTENT_LENGTH);
                    if self.headers.contains_key(ETAG) {
                        self.headers.remove(LAST_MODIFIED);
                    }
                    self.write_header(StatusCode::NOT_MODIFIED);
                    return Ok(());
                }
                Precondition::Failed => {
                    self.write_header(StatusCode::PRECONDITION_FAILED);
                    return Ok(());
                }
            }
        }

        if !self.headers.contains_key(CONTENT_TYPE) {
            let mut head = vec![0u8; SNIFF_LEN.min(size as usize)];
            content.read_exact(&mut head).await?;
            content.seek(SeekFrom::Start(0)).await?;
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(sniff_content_type(&head)));
        }

        let range = if negotiable && self.if_range_allows() {
            self.request_header(RANGE)
                .map_or(ByteRange::Full, |spec| parse_range(spec, size))
        } else {
            ByteRange::Full
        };

        self.headers
            .insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let (status, start, len) = match range {
            ByteRange::Full => (StatusCode::OK, 0, size),
            ByteRange::Single { start, len } => {
                let value = format!("bytes {}-{}/{}", start, start + len - 1, size);
                self.headers.insert(CONTENT_RANGE, header_value(&value)?);
                (StatusCode::PARTIAL_CONTENT, start, len)
            }
            ByteRange::Unsatisfiable => {
                self.headers
                    .insert(CONTENT_RANGE, header_value(&format!("bytes */{}", size))?);
                self.headers.remove(CONTENT_TYPE);
                self.write_header(StatusCode::RANGE_NOT_SATISFIABLE);
                return Ok(());
            }
        };

        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        self.write_header(status);

        if self.is_head_request() || len == 0 {
            return Ok(());
        }
        if start > 0 {
            content.seek(SeekFrom::Start(start)).await?;
        }
        self.copy_body(&mut content, len).await
    }

    /// Serve the file at `path`, or its index document for a directory.
    pub async fn write_file(&mut self, path: impl AsRef<Path>) -> Result<(), Error> {
        let mut path = std::path::absolute(path.as_ref())?;
        let metadata = tokio::fs::metadata(&path).await?;

        if metadata.is_dir() {
            let request_path = self.request.uri.path();
            if !request_path.ends_with('/') {
                let mut target = format!("{}/", request_path);
                if let Some(query) = self.request.uri.query() {
                    target.push('?');
                    target.push_str(query);
                }
                self.status = StatusCode::MOVED_PERMANENTLY;
                return self.redirect(&target);
            }
            path.push(&self.ctx.config.content.index_file);
        }

        let (mut content, mime_type, checksum, mod_time): (Box<dyn Content>, _, _, _) =
            match self.ctx.coffer.asset(&path)? {
                Some(asset) => (
                    Box::new(std::io::Cursor::new(asset.content.clone())),
                    Some(asset.mime_type.clone()).filter(|m| !m.is_empty()),
                    Some(asset.checksum),
                    asset.mod_time,
                ),
                None => {
                    let file = tokio::fs::File::open(&path).await?;
                    let modified = file.metadata().await?.modified()?;
                    (Box::new(file), None, None, modified)
                }
            };

        if !self.headers.contains_key(CONTENT_TYPE) {
            let mime_type = mime_type.or_else(|| {
                mime_guess::from_path(&path)
                    .first()
                    .map(|m| m.essence_str().to_string())
            });
            if let Some(mime_type) = mime_type {
                let value = if mime_type.starts_with("text/") {
                    format!("{}; charset=utf-8", mime_type)
                } else {
                    mime_type
                };
                self.headers.insert(CONTENT_TYPE, header_value(&value)?);
            }
        }

        if !self.headers.contains_key(ETAG) {
            let checksum = match checksum {
                Some(checksum) => checksum,
                None => digest(&mut content).await?,
            };
            let value = format!("\"{}\"", hex::encode(checksum));
            self.headers.insert(ETAG, header_value(&value)?);
        }

        if !self.headers.contains_key(LAST_MODIFIED) {
            self.headers
                .insert(LAST_MODIFIED, header_value(&http_date(mod_time))?);
        }

        self.write_content(content).await
    }

    async fn copy_body<R: Content>(&mut self, content: &mut R, limit: u64) -> Result<(), Error> {
        let mut remaining = limit;
        let mut buf = vec![0u8; COPY_CHUNK];
        while remaining > 0 {
            let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
            let n = content.read(&mut buf[..want]).await?;
            if n == 0 {
                break;
            }
            remaining -= n as u64;
            self.write_bytes(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        Ok(())
    }

    fn modified_secs(&self) -> Option<i64> {
        self.header(LAST_MODIFIED).and_then(parse_http_date)
    }

    fn is_safe_method(&self) -> bool {
        matches!(*self.request_method(), Method::GET | Method::HEAD)
    }

    fn preconditions(&self) -> Precondition {
        let etag = self.header(ETAG);
        let modified = self.modified_secs();

        let mut condition = match self.request_header(IF_MATCH) {
            Some(list) => match_etags(list, etag, true),
            None => Condition::None,
        };
        if condition == Condition::None {
            condition = match (self.request_header(IF_UNMODIFIED_SINCE).and_then(parse_http_date), modified) {
                (Some(since), Some(modified)) if modified <= since => Condition::True,
                (Some(_), Some(_)) => Condition::False,
                _ => Condition::None,
            };
        }
        if condition == Condition::False {
            return Precondition::Failed;
        }

        match self.request_header(IF_NONE_MATCH) {
            Some(list) if match_etags(list, etag, false) == Condition::True => {
                return if self.is_safe_method() {
                    Precondition::NotModified
                } else {
                    Precondition::Failed
                };
            }
            Some(_) => {}
            None => {
                if self.is_safe_method() {
                    let since = self.request_header(IF_MODIFIED_SINCE).and_then(parse_http_date);
                    if let (Some(since), Some(modified)) = (since, modified) {
                        if modified <= since {
                            return Precondition::NotModified;
                        }
                    }
                }
            }
        }

        Precondition::Proceed
    }

    fn if_range_allows(&self) -> bool {
        let Some(validator) = self.request_header(IF_RANGE) else {
            return true;
        };
        if !self.is_safe_method() {
            return true;
        }
        let validator = validator.trim();
        if validator.starts_with('"') || validator.starts_with("W/") {
            return match_etags(validator, self.header(ETAG), true) == Condition::True;
        }
        match (parse_http_date(validator), self.modified_secs()) {
            (Some(date), Some(modified)) => date == modified,
            _ => false,
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(value).map_err(Error::other)
}

async fn digest(content: &mut Box<dyn Content>) -> Result<[u8; 32], Error> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    loop {
        let n = content.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    content.seek(SeekFrom::Start(0)).await?;
    Ok(hasher.finalize().into())
}

/// Compare an entity-tag list against the response ETag.
///
/// `True` when any listed tag matches (or the list is `*` and an ETag exists).
fn match_etags(list: &str, etag: Option<&str>, strong: bool) -> Condition {
    let list = list.trim();
    if list == "*" {
        return if etag.is_some() || !strong {
            Condition::True
        } else {
            Condition::False
        };
    }
    let Some(etag) = etag else {
        return Condition::False;
    };

    let (ours_weak, ours) = split_weak(etag);
    for candidate in list.split(',') {
        let (theirs_weak, theirs) = split_weak(candidate.trim());
        if theirs.is_empty() {
            continue;
        }
        if strong && (ours_weak || theirs_weak) {
            continue;
        }
        if theirs == ours {
            return Condition::True;
        }
    }
    Condition::False
}

fn split_weak(tag: &str) -> (bool, &str) {
    match tag.strip_prefix("W/") {
        Some(rest) => (true, rest),
        None => (false, tag),
    }
}

/// Interpret a `Range` header against a representation of `size` bytes.
fn parse_range(spec: &str, size: u64) -> ByteRange {
    let Some(set) = spec.trim().strip_prefix("bytes=") else {
        return ByteRange::Unsatisfiable;
    };

    let mut ranges = Vec::new();
    let mut no_overlap = false;

    for part in set.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((first, last)) = part.split_once('-') else {
            return ByteRange::Unsatisfiable;
        };
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            let Ok(suffix) = last.parse::<u64>() else {
                return ByteRange::Unsatisfiable;
            };
            if suffix == 0 {
                no_overlap = true;
                continue;
            }
            let suffix = suffix.min(size);
            ranges.push((size - suffix, suffix));
            continue;
        }

        let Ok(start) = first.parse::<u64>() else {
            return ByteRange::Unsatisfiable;
        };
        if start >= size {
            no_overlap = true;
            continue;
        }
        let end = if last.is_empty() {
            size - 1
        } else {
            match last.parse::<u64>() {
                Ok(end) if end >= start => end.min(size - 1),
                _ => return ByteRange::Unsatisfiable,
            }
        };
        ranges.push((start, end - start + 1));
    }

    match ranges.as_slice() {
        [] if no_overlap => ByteRange::Unsatisfiable,
        [(start, len)] if *len > 0 => ByteRange::Single {
            start: *start,
            len: *len,
        },
        _ => ByteRange::Full,
    }
}

/// Content type guessed from the first bytes of a body.
fn sniff_content_type(head: &[u8]) -> &'static str {
    let trimmed = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&head[..0], |i| &head[i..]);
    let lower: Vec<u8> = trimmed.iter().take(14).map(u8::to_ascii_lowercase).collect();

    if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        return "text/html; charset=utf-8";
    }

    let text = match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut at the sniff boundary is still text.
        Err(e) => e.error_len().is_none(),
    };
    let binary_control = head
        .iter()
        .any(|b| b.is_ascii_control() && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b));

    if text && !binary_control {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    }
}
