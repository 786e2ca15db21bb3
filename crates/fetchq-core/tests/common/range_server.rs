//! Minimal HTTP/1.1 origin for integration tests.
//!
//! Serves one static body with HEAD and Range GET support, plus failure
//! injection: HEAD can be blocked, ranges can be refused, and the first N
//! GET responses can be cut short mid-body to exercise the fetcher's
//! retry-and-resume path.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct OriginOptions {
    /// If false, HEAD returns 405 (origins that block HEAD).
    pub head_allowed: bool,
    /// If false, GET ignores Range and always serves the full body with 200.
    pub support_ranges: bool,
    /// Cut the first N GET responses short after half the requested bytes.
    pub truncate_first_gets: usize,
    /// Pause between body chunks (for cancellation tests).
    pub chunk_delay: Option<Duration>,
}

impl Default for OriginOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            truncate_first_gets: 0,
            chunk_delay: None,
        }
    }
}

/// A running test origin. Lives until the process exits.
pub struct Origin {
    pub url: String,
    gets: Arc<AtomicUsize>,
}

impl Origin {
    pub fn start(body: Vec<u8>) -> Self {
        Self::start_with_options(body, OriginOptions::default())
    }

    pub fn start_with_options(body: Vec<u8>, opts: OriginOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test origin");
        let port = listener.local_addr().unwrap().port();
        let body = Arc::new(body);
        let gets = Arc::new(AtomicUsize::new(0));
        let truncations = Arc::new(AtomicUsize::new(0));

        {
            let gets = Arc::clone(&gets);
            thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    let body = Arc::clone(&body);
                    let gets = Arc::clone(&gets);
                    let truncations = Arc::clone(&truncations);
                    thread::spawn(move || serve(stream, &body, opts, &gets, &truncations));
                }
            });
        }

        Self {
            url: format!("http://127.0.0.1:{port}/file"),
            gets,
        }
    }

    /// Number of GET requests served so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }
}

fn serve(
    mut stream: TcpStream,
    body: &[u8],
    opts: OriginOptions,
    gets: &AtomicUsize,
    truncations: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        if !opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let ranges = if opts.support_ranges {
            "Accept-Ranges: bytes\r\n"
        } else {
            "Accept-Ranges: none\r\n"
        };
        let response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{ranges}Connection: close\r\n\r\n");
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    gets.fetch_add(1, Ordering::Relaxed);

    let (status_line, content_range, slice) = match range {
        Some((start, end_incl)) if opts.support_ranges => {
            if start >= total {
                let _ = stream.write_all(
                    format!("HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{total}\r\nContent-Length: 0\r\n\r\n")
                        .as_bytes(),
                );
                return;
            }
            let end_incl = end_incl.min(total - 1);
            let slice = &body[start as usize..=end_incl as usize];
            (
                "206 Partial Content",
                Some(format!("bytes {start}-{end_incl}/{total}")),
                slice,
            )
        }
        _ => ("200 OK", None, body),
    };

    let mut headers = format!(
        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\n",
        slice.len()
    );
    if let Some(cr) = content_range {
        headers.push_str(&format!("Content-Range: {cr}\r\n"));
    }
    if opts.support_ranges {
        headers.push_str("Accept-Ranges: bytes\r\n");
    }
    headers.push_str("Connection: close\r\n\r\n");
    if stream.write_all(headers.as_bytes()).is_err() {
        return;
    }

    // Failure injection: declare the full length but close early.
    let to_send = if truncations.fetch_add(1, Ordering::Relaxed) < opts.truncate_first_gets {
        &slice[..slice.len() / 2]
    } else {
        slice
    };

    match opts.chunk_delay {
        Some(delay) => {
            for chunk in to_send.chunks(4096) {
                if stream.write_all(chunk).is_err() {
                    return;
                }
                thread::sleep(delay);
            }
        }
        None => {
            let _ = stream.write_all(to_send);
        }
    }
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=A-B`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let value = value.trim();
        let Some(bounds) = value.strip_prefix("bytes=") else {
            continue;
        };
        if let Some((a, b)) = bounds.split_once('-') {
            let start = a.trim().parse::<u64>().unwrap_or(0);
            let end = if b.trim().is_empty() {
                u64::MAX
            } else {
                b.trim().parse::<u64>().unwrap_or(0)
            };
            range = Some((start, end));
        }
    }
    (method, range)
}
