//! Optimistic concurrency over checksummed ranges.
//!
//! A caller records a range's checksum when it reads, and hands it back before
//! writing. If another editor changed the range in between, the detector says
//! so instead of letting the write clobber it.

use crate::dispatch::provider_failure;
use crate::errors::Result;
use crate::model::{GridRange, SectionId};
use crate::provider::SheetProvider;
use crate::rate_limit::{OperationClass, RateLimiter};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ConflictResolution {
    /// Content unchanged since it was read.
    Proceed,
    /// The section is gone; writing would recreate nothing sensible.
    Abort,
    /// Someone else changed the range.
    NeedsMerge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictReport {
    pub section_id: SectionId,
    pub range: GridRange,
    pub expected_checksum: String,
    /// `None` when the section no longer exists.
    pub observed_checksum: Option<String>,
    pub resolution: ConflictResolution,
    pub reason: String,
}

impl ConflictReport {
    pub fn is_conflict(&self) -> bool {
        self.resolution != ConflictResolution::Proceed
    }
}

pub struct ConflictDetector {
    provider: Arc<dyn SheetProvider>,
    limiter: Arc<RateLimiter>,
}

impl ConflictDetector {
    pub fn new(provider: Arc<dyn SheetProvider>, limiter: Arc<RateLimiter>) -> Self {
        Self { provider, limiter }
    }

    /// Current content checksum of `range`, or `None` if its section is gone.
    pub async fn checksum(&self, range: &GridRange) -> Result<Option<String>> {
        self.limiter.acquire(OperationClass::Read, 1).await?;
        let state = self
            .provider
            .fetch_section(range.section_id, Some(range))
            .await
            .map_err(|err| provider_failure(&self.limiter, OperationClass::Read, err))?;
        Ok(state.exists().then(|| state.content_checksum(range)))
    }

    /// Compare `range`'s content against the checksum taken when it was read.
    pub async fn detect(&self, range: &GridRange, expected_checksum: &str) -> Result<ConflictReport> {
        let observed = self.checksum(range).await?;
        let (resolution, reason) = match &observed {
            None => (
                ConflictResolution::Abort,
                format!("section {} no longer exists", range.section_id),
            ),
            Some(observed) if observed == expected_checksum => (
                ConflictResolution::Proceed,
                "content unchanged since it was read".to_string(),
            ),
            Some(_) => (
                ConflictResolution::NeedsMerge,
                format!("{} changed since it was read", range.to_a1()),
            ),
        };

        let report = ConflictReport {
            section_id: range.section_id,
            range: *range,
            expected_checksum: expected_checksum.to_string(),
            observed_checksum: observed,
            resolution,
            reason,
        };
        if report.is_conflict() {
            warn!(range = %range.to_a1(), section_id = %range.section_id, resolution = %resolution, "range conflict");
        } else {
            debug!(range = %range.to_a1(), "no conflict");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SectionProperties;
    use crate::provider::MemoryProvider;
    use crate::rate_limit::RateLimitConfig;

    fn detector(provider: Arc<MemoryProvider>) -> ConflictDetector {
        ConflictDetector::new(provider, Arc::new(RateLimiter::new(RateLimitConfig::default())))
    }

    #[tokio::test]
    async fn unchanged_range_proceeds_and_edits_need_merge() {
        let provider = Arc::new(
            MemoryProvider::new("Book").with_section(SectionProperties::new(1, "Data", 0)),
        );
        provider.set_cell(SectionId(1), 0, 0, "a");
        let detector = detector(provider.clone());
        let range = GridRange::new(SectionId(1), 0, 2, 0, 2);

        let expected = detector.checksum(&range).await.unwrap().unwrap();
        let report = detector.detect(&range, &expected).await.unwrap();
        assert_eq!(report.resolution, ConflictResolution::Proceed);

        provider.set_cell(SectionId(1), 1, 1, "b");
        let report = detector.detect(&range, &expected).await.unwrap();
        assert_eq!(report.resolution, ConflictResolution::NeedsMerge);
        assert_ne!(report.observed_checksum.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn missing_section_aborts() {
        let provider = Arc::new(MemoryProvider::new("Book"));
        let report = detector(provider)
            .detect(&GridRange::cell(7, 0, 0), "deadbeef")
            .await
            .unwrap();
        assert_eq!(report.resolution, ConflictResolution::Abort);
        assert_eq!(report.observed_checksum, None);
    }
}
