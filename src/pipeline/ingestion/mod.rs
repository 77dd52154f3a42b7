// Pipeline ingestion: translation-service access, URL discovery strategies,
// feed handling and rate limiting.

pub mod crawler;
pub mod feed;
pub mod harvester;
pub mod rate_limiter;
pub mod translation_server;
