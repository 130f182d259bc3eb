//! serpmine: incremental mining of search engine result pages from web
//! archives.
//!
//! Captures of search result URLs are discovered through CDX capture
//! indices, archived responses are downloaded into WARC files, and queries,
//! result snippets and direct answers are extracted with configurable
//! parser chains. Every step is an incremental stage over a document store.

pub mod cdx;
pub mod cli;
pub mod config;
pub mod docstore;
pub mod extraction;
pub mod http_client;
pub mod ids;
pub mod memento;
pub mod models;
pub mod pipeline;
pub mod stages;
pub mod warc_store;
