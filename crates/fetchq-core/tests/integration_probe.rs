//! Probe integration: fallback chain against origins with different
//! capabilities.

mod common;

use common::range_server::{Origin, OriginOptions};
use fetchq_core::probe;

#[test]
fn probe_reads_head_headers() {
    let origin = Origin::start(vec![7u8; 10_240]);
    let result = probe::probe(&origin.url).unwrap();
    assert!(result.supports_ranges);
    assert_eq!(result.total_size, 10_240);
    // HEAD sufficed; no body request was needed.
    assert_eq!(origin.get_count(), 0);
}

#[test]
fn probe_falls_back_to_ranged_get_when_head_is_blocked() {
    let origin = Origin::start_with_options(
        vec![7u8; 10_240],
        OriginOptions {
            head_allowed: false,
            ..Default::default()
        },
    );
    let result = probe::probe(&origin.url).unwrap();
    assert!(result.supports_ranges, "206 implies range support");
    assert_eq!(result.total_size, 10_240, "total comes from Content-Range");
    assert_eq!(origin.get_count(), 1);
}

#[test]
fn probe_reports_missing_range_support() {
    let origin = Origin::start_with_options(
        vec![7u8; 4_096],
        OriginOptions {
            support_ranges: false,
            ..Default::default()
        },
    );
    let result = probe::probe(&origin.url).unwrap();
    assert!(!result.supports_ranges);
    assert_eq!(result.total_size, 4_096);
}

#[test]
fn probe_fails_when_nothing_listens() {
    let dead_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = probe::probe(&format!("http://127.0.0.1:{dead_port}/file")).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("probe"), "unexpected error: {msg}");
}

#[test]
fn probe_rejects_empty_bodies() {
    let origin = Origin::start(Vec::new());
    // Content-Length: 0 is not a downloadable file.
    assert!(probe::probe(&origin.url).is_err());
}
