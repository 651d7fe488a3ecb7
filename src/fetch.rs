//! Bounded-retry HTTP GET used by trackers to query external price feeds.

pub(crate) mod backoff;
pub mod client;
pub mod options;
pub mod request;

pub use client::{fetch_with_retries, FetchError, HttpFetcher};
pub use options::FetchOptions;
pub use request::FetchRequest;
