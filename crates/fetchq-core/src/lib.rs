pub mod config;
pub mod logging;

pub mod control;
pub mod engine;
pub mod fetcher;
pub mod ledger;
pub mod plan;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod storage;
pub mod worker;

/// User-Agent sent on every request to an origin.
pub const USER_AGENT: &str = concat!("fetchq/", env!("CARGO_PKG_VERSION"));

/// Current time as Unix seconds, used for every stored timestamp.
pub(crate) fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Percent-encode a path for a sqlite:// URI so spaces and special chars
/// don't break parsing.
pub(crate) fn path_to_sqlite_uri(path: &std::path::Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}
