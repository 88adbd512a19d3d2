//! Boundary to the spreadsheet backend.
//!
//! The engine talks to a backend only through [`SheetProvider`]. Production
//! deployments wrap a remote API; [`MemoryProvider`] keeps a whole workbook in
//! memory for tests, the CLI simulator and local experiments.

mod memory;

pub use memory::{Fault, MemoryProvider, SectionFixture, WorkbookFixture};

use crate::compiler::ProviderRequest;
use crate::errors::ProviderError;
use crate::model::{DocumentMetadata, GridRange, SectionId, SectionMetadata, SectionState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-request reply, index-aligned with the dispatched requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_section_id: Option<SectionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_object_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_permission_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReply {
    pub replies: Vec<RequestReply>,
}

/// Backend operations the engine relies on.
///
/// `batch_dispatch` applies the requests atomically or in order; on failure
/// the error's `applied_requests` says how many reached the document, when
/// the backend knows.
#[async_trait]
pub trait SheetProvider: Send + Sync {
    async fn batch_dispatch(&self, requests: &[ProviderRequest])
    -> Result<BatchReply, ProviderError>;

    /// Structure of a section plus the values inside `range`. A missing
    /// section comes back as [`SectionState::absent`], not as an error.
    async fn fetch_section(
        &self,
        section_id: SectionId,
        range: Option<&GridRange>,
    ) -> Result<SectionState, ProviderError>;

    async fn fetch_metadata(&self, section_id: SectionId)
    -> Result<SectionMetadata, ProviderError>;

    async fn fetch_document(&self) -> Result<DocumentMetadata, ProviderError>;
}
