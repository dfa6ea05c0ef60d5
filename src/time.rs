//! Timestamp helpers.
//!
//! Every `createdAt` / `fetchedAt` / `derivedAt` value in the engine is a Unix
//! timestamp in milliseconds taken from [`now_timestamp_millis`].

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
