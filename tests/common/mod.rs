//! Shared helpers for integration tests: log capture and index fixtures.
//!
//! # Logging
//!
//! Call [`init_tracing`] at the top of a test. Events from the crate are
//! captured only when it is built with `--features tracing`:
//!
//! ```bash
//! RUST_LOG=utree=debug,utree::page=trace \
//!     cargo nextest run --features tracing --test stress_tests
//! ```
//!
//! | Variable            | Effect                                   |
//! |---------------------|------------------------------------------|
//! | `RUST_LOG`          | Filter directives (default `info`)       |
//! | `UTREE_LOG_DIR`     | Directory for the log file (`logs/`)     |
//! | `UTREE_LOG_CONSOLE` | `0` silences the console layer           |
//!
//! The file layer appends NDJSON to `<dir>/utree.jsonl`, one object per
//! event, so runs from separate nextest processes interleave safely:
//!
//! ```bash
//! # Every abandoned insert
//! jq 'select(.fields.message == "insert abandoned after retry budget")' logs/utree.jsonl
//!
//! # Splits of one key range
//! jq 'select(.fields.split_key != null and .fields.split_key < 1000)' logs/utree.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, Once};

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};
use utree::list::ListNode;
use utree::{PoolConfig, UTree};

static INIT: Once = Once::new();

const LOG_FILE: &str = "utree.jsonl";

/// Install the console and file subscribers. Only the first call counts.
pub fn init_tracing() {
    INIT.call_once(install_subscriber);
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn log_dir() -> PathBuf {
    env::var_os("UTREE_LOG_DIR").map_or_else(|| PathBuf::from("logs"), PathBuf::from)
}

#[expect(clippy::expect_used)]
fn install_subscriber() {
    let dir = log_dir();
    fs::create_dir_all(&dir).expect("create log directory");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))
        .expect("open log file");

    let quiet = env::var("UTREE_LOG_CONSOLE").is_ok_and(|v| v == "0");
    let console = (!quiet).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_names(true)
            .with_target(true)
            .with_line_number(true)
            .compact()
            .with_filter(filter())
    });

    let json = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .with_filter(filter());

    // Another test binary may already own the global subscriber.
    let _ = Registry::default().with(console).with(json).try_init();
}

// ============================================================================
//  Index Fixtures
// ============================================================================

/// Anonymous pool large enough for a few hundred thousand records.
pub fn small_config(workers: usize) -> PoolConfig {
    PoolConfig::new(workers).with_capacity(64 << 20)
}

/// Durable keys in list order.
pub fn durable_keys(tree: &UTree) -> Vec<i64> {
    tree.durable_iter().map(ListNode::key).collect()
}

/// Panic unless the durable list is strictly increasing.
pub fn assert_sorted(tree: &UTree) {
    let keys = durable_keys(tree);
    if let Some(w) = keys.windows(2).find(|w| w[0] >= w[1]) {
        panic!("durable list out of order at {} -> {}", w[0], w[1]);
    }
}

#[test]
fn test_tracing_init_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(key = 7_i64, "tracing initialised");
}
