//! Domain models persisted in the document store.

mod archive;
mod capture;
mod parser;
mod result;
mod serp;
mod source;
mod status;

pub use archive::{Archive, ArchiveRef, Provider, ProviderRef};
pub use capture::{Capture, CaptureRef};
pub use parser::{ParserRecord, ParserTarget, ParserType};
pub use result::{content_hash, ResultKind, ResultRecord};
pub use serp::{DirectAnswerRef, Serp, SerpRef, SnippetRef, WarcLocation};
pub use source::Source;
pub use status::{Download, Fetch, Parse, Status, StatusPaths, StatusVerb};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::docstore::Index;

/// A top-level stored document.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const INDEX: Index;

    fn id(&self) -> Uuid;

    fn last_modified(&self) -> DateTime<Utc>;
}
