//! Fuzz testing for inbound header parsing and classification.
//!
//! Every function here sees client-controlled bytes on every request, so
//! none of them may panic, whatever the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the header parsing fuzz target
//! cargo +nightly fuzz run fuzz_header_parsing
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_header_parsing -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `parse_traceparent` and the request/trace id extractors
//! - `categorize_user_agent`
//! - `hash_ip` and `CidrRange::parse`
//! - `is_sensitive_field`
//! - `prerender::output_file`

#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use site_gate::logging::is_sensitive_field;
use site_gate::middleware::identity::{
    extract_or_generate_request_id, extract_or_generate_trace_id, parse_traceparent,
};
use site_gate::middleware::ip::{CidrRange, hash_ip};
use site_gate::middleware::user_agent::categorize_user_agent;
use site_gate::prerender::output_file;

use axum::http::{HeaderMap, HeaderValue};

fuzz_target!(|data: &[u8]| {
    // Raw header bytes: only visible ASCII and a few others are valid values.
    if let Ok(value) = HeaderValue::from_bytes(data) {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", value.clone());
        headers.insert("x-request-id", value);

        let request_id = extract_or_generate_request_id(&headers);
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!request_id.is_empty());
        assert!(!trace_id.is_empty());
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_traceparent(Some(s));
        let _ = categorize_user_agent(s);
        assert_eq!(hash_ip(s).len(), 16);
        let _ = CidrRange::parse(s);
        let _ = is_sensitive_field(s);

        if let Ok(file) = output_file(Path::new("out"), s) {
            assert!(file.starts_with("out"));
        }
    }
});
