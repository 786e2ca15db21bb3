//! Origin probing: total size and byte-range support.
//!
//! Uses the curl crate (libcurl) to inspect response headers. The probe
//! decides how a transfer is segmented: when the origin does not support
//! ranges the engine clamps the transfer to a single part.

use anyhow::{Context, Result};
use std::str;
use std::time::Duration;

use crate::USER_AGENT;

/// What the engine needs to know about the origin before planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// True if the origin honors `Range: bytes=...` requests.
    pub supports_ranges: bool,
    /// Total body size in bytes.
    pub total_size: u64,
}

/// Headers the probe cares about, parsed from raw response lines.
#[derive(Debug, Clone, Default)]
struct ProbeHeaders {
    content_length: Option<u64>,
    accept_ranges: bool,
    content_range_total: Option<u64>,
}

fn parse_headers(lines: &[String]) -> ProbeHeaders {
    let mut out = ProbeHeaders::default();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                out.content_length = Some(n);
            }
        }
        if name.eq_ignore_ascii_case("accept-ranges") {
            out.accept_ranges = value.eq_ignore_ascii_case("bytes");
        }
        if name.eq_ignore_ascii_case("content-range") {
            out.content_range_total = parse_content_range_total(value);
        }
    }
    out
}

/// Total size from a `Content-Range` value such as `bytes 0-1023/10485760`.
/// `*` totals are unknown and yield `None`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.split_once('/')?;
    let total = total.trim();
    if total == "*" {
        return None;
    }
    total.parse::<u64>().ok()
}

struct RawResponse {
    code: u32,
    headers: Vec<String>,
}

/// Issue one request and collect the final response's headers. `range` adds
/// a `Range: bytes=...` header; the body, if any, is discarded.
fn request(url: &str, head_only: bool, range: Option<&str>) -> Result<RawResponse> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.useragent(USER_AGENT)?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.timeout(Duration::from_secs(30))?;
    if head_only {
        easy.nobody(true)?;
    }
    if let Some(r) = range {
        easy.range(r)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // curl emits one header block per redirect hop; keep only the
                // final response's headers.
                if line.starts_with("HTTP/") {
                    headers.clear();
                }
                headers.push(line.to_string());
            }
            true
        })?;
        transfer.write_function(|data| Ok(data.len()))?;
        transfer.perform().context("probe request failed")?;
    }

    let code = easy.response_code().context("no response code")? as u32;
    Ok(RawResponse { code, headers })
}

/// Determine total size and range support for `url`.
///
/// Fallback chain:
/// 1. HEAD: `Content-Length` + `Accept-Ranges: bytes`.
/// 2. Ranged GET of the first KiB: a 206 implies range support, with the
///    total parsed from `Content-Range`; a 200 means no ranges but the
///    `Content-Length` may still be usable.
/// 3. Plain GET, reading the length from its headers; ranges marked
///    unsupported.
///
/// Fails when every path leaves the total size unknown or zero.
pub fn probe(url: &str) -> Result<ProbeResult> {
    let mut supports_ranges = false;
    let mut total_size: Option<u64> = None;

    match request(url, true, None) {
        Ok(resp) if (200..300).contains(&resp.code) => {
            let parsed = parse_headers(&resp.headers);
            supports_ranges = parsed.accept_ranges;
            total_size = parsed.content_length;
        }
        Ok(resp) => {
            tracing::debug!(url, code = resp.code, "HEAD rejected, trying ranged GET");
            probe_via_get(url, &mut supports_ranges, &mut total_size)?;
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD failed, trying ranged GET");
            probe_via_get(url, &mut supports_ranges, &mut total_size)?;
        }
    }

    match total_size {
        Some(n) if n > 0 => Ok(ProbeResult {
            supports_ranges,
            total_size: n,
        }),
        _ => anyhow::bail!("origin did not provide a content length for {url}"),
    }
}

/// Steps 2 and 3 of the fallback chain.
fn probe_via_get(url: &str, supports_ranges: &mut bool, total_size: &mut Option<u64>) -> Result<()> {
    let resp = request(url, false, Some("0-1023")).context("ranged GET probe failed")?;
    let parsed = parse_headers(&resp.headers);
    match resp.code {
        206 => {
            // The origin honored the range even if Accept-Ranges was absent.
            *supports_ranges = true;
            *total_size = parsed.content_range_total;
        }
        200 => {
            *supports_ranges = false;
            *total_size = parsed.content_length;
        }
        code => anyhow::bail!("origin returned HTTP {code} for {url}"),
    }

    if total_size.is_none() {
        tracing::debug!(url, "no length from ranged GET, trying full GET");
        let resp = request(url, false, None).context("full GET probe failed")?;
        if resp.code == 200 {
            *total_size = parse_headers(&resp.headers).content_length;
        }
    }
    Ok(())
}
