//! Outreach tracking engine: applications, recruiters, send history and
//! follow-up scheduling over a local SQLite store.
//!
//! The engine is synchronous and single-writer. All temporal operations take
//! an injected `now`, and the rate limiter's deny results are values rather
//! than blocking waits, so callers own every sleep and retry.

pub mod config;
pub mod contacts;
pub mod db;
pub mod error;
pub mod mailer;
pub mod models;
pub mod ratelimit;
pub mod schedule;
pub mod templates;
pub mod tracker;

pub use db::Database;
pub use error::{Result, TrackError};
