//! Run-wide metrics sink
//!
//! Counters and values accumulated anywhere in the pipeline and flushed as a
//! single JSON line on stdout at teardown. Tests must call [`reset`] between
//! cases.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

static REPORT: Lazy<Mutex<BTreeMap<String, Value>>> = Lazy::new(|| Mutex::new(BTreeMap::new()));

/// Store an arbitrary value under the given key.
///
/// Panics on non-finite floats (serde_json maps them to `Null`); a NaN in the
/// report is always a bug upstream.
pub fn commit<V: Into<Value>>(key: &str, value: V) {
    let value = value.into();
    if value.is_null() {
        panic!("report::commit({:?}, non-finite or null value)", key);
    }
    REPORT.lock().insert(key.to_string(), value);
}

/// Fetch a previously committed value.
pub fn get(key: &str) -> Option<Value> {
    REPORT.lock().get(key).cloned()
}

/// Increment the integer counter under the given key, returning the new value.
/// The counter starts at zero when absent.
pub fn increment(key: &str) -> i64 {
    let mut report = REPORT.lock();
    let counter = report
        .entry(key.to_string())
        .or_insert_with(|| Value::from(0));
    let next = counter.as_i64().unwrap_or(0) + 1;
    *counter = Value::from(next);
    next
}

/// Serialize the report to one JSON line on stdout.
pub fn write() {
    let report = REPORT.lock();
    match serde_json::to_string(&*report) {
        Ok(line) => println!("{}", line),
        Err(err) => tracing::error!("failed to serialize the report: {}", err),
    }
}

/// Drop all accumulated values.
pub fn reset() {
    REPORT.lock().clear();
}
