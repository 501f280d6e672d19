//! Data models for the S3 bucket repository.
//!
//! Listing types are request-scoped values built per call. Instance records
//! map to SQLite rows via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod endpoint;
pub mod instance;
pub mod listing;
pub mod storage_class;
