//! Loose range references to canonical grid coordinates.
//!
//! Resolution is split in two. [`RangeResolver::prefetch`] does the I/O: it
//! brings section and document metadata into an LRU cache with a short TTL and
//! freezes what a compile needs into a [`ResolutionScope`]. The scope resolves
//! synchronously and deterministically, which is what lets a dry-run compile
//! and the real compile that follows it agree.

use crate::dispatch::provider_failure;
use crate::errors::{OpsError, Result};
use crate::intent::Intent;
use crate::model::{A1Range, DocumentMetadata, GridRange, SectionId, SectionMetadata};
use crate::provider::SheetProvider;
use crate::rate_limit::{OperationClass, RateLimiter};
use lru::LruCache;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A range reference in any supported form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum RangeRef {
    /// Explicit coordinates; no lookup.
    Grid(GridRange),
    /// `Sheet!A1:B2`, `B2:D9`, `A:C`, `2:5`. Without a sheet prefix the
    /// reference is relative to `section_id`.
    A1 {
        #[serde(default)]
        section_id: Option<SectionId>,
        notation: String,
    },
    Named {
        name: String,
    },
    /// The data cells of the column whose header best matches `header`.
    Header {
        section_id: SectionId,
        header: String,
        /// Accept a low-confidence match instead of failing.
        #[serde(default)]
        best_effort: bool,
    },
}

impl RangeRef {
    pub fn grid(range: GridRange) -> Self {
        Self::Grid(range)
    }

    pub fn a1(section_id: impl Into<SectionId>, notation: impl Into<String>) -> Self {
        Self::A1 {
            section_id: Some(section_id.into()),
            notation: notation.into(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Self::Grid(range) => {
                if range.is_empty() {
                    return Err(format!("grid range {range} is empty"));
                }
            }
            Self::A1 {
                section_id,
                notation,
            } => {
                let parsed = A1Range::parse(notation).map_err(|e| e.to_string())?;
                if parsed.sheet.is_none() && section_id.is_none() {
                    return Err(format!(
                        "'{notation}' has no sheet prefix and no section_id"
                    ));
                }
            }
            Self::Named { name } => {
                if name.trim().is_empty() {
                    return Err("range name is empty".to_string());
                }
            }
            Self::Header { header, .. } => {
                if header.trim().is_empty() {
                    return Err("header text is empty".to_string());
                }
            }
        }
        Ok(())
    }

    pub fn collect_metadata_needs(&self, needs: &mut MetadataNeeds) {
        match self {
            Self::Grid(_) => {}
            Self::A1 {
                section_id,
                notation,
            } => {
                let Ok(parsed) = A1Range::parse(notation) else {
                    return;
                };
                if parsed.sheet.is_some() {
                    needs.document();
                } else if let Some(section_id) = section_id
                    && parsed.is_open_ended()
                {
                    needs.section(*section_id);
                }
            }
            Self::Named { .. } => needs.document(),
            Self::Header { section_id, .. } => needs.section(*section_id),
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grid(range) => write!(f, "{range}"),
            Self::A1 {
                section_id: Some(id),
                notation,
            } => write!(f, "section {id}:{notation}"),
            Self::A1 { notation, .. } => f.write_str(notation),
            Self::Named { name } => write!(f, "named range '{name}'"),
            Self::Header {
                section_id, header, ..
            } => write!(f, "header '{header}' in section {section_id}"),
        }
    }
}

/// Metadata a set of references needs before it can resolve offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataNeeds {
    pub sections: BTreeSet<SectionId>,
    pub document: bool,
}

impl MetadataNeeds {
    pub fn section(&mut self, id: SectionId) {
        self.sections.insert(id);
    }

    pub fn document(&mut self) {
        self.document = true;
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && !self.document
    }
}

/// A non-winning interpretation of an ambiguous reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeCandidate {
    pub range: GridRange,
    pub header: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub range: GridRange,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<RangeCandidate>,
}

impl Resolution {
    fn exact(range: GridRange) -> Self {
        Self {
            range,
            confidence: 1.0,
            warnings: Vec::new(),
            candidates: Vec::new(),
        }
    }
}

/// Frozen metadata view used for one compile.
#[derive(Debug, Clone)]
pub struct ResolutionScope {
    sections: BTreeMap<SectionId, Arc<SectionMetadata>>,
    document: Option<Arc<DocumentMetadata>>,
    min_confidence: f64,
}

impl Default for ResolutionScope {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_CONFIDENCE)
    }
}

impl ResolutionScope {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            sections: BTreeMap::new(),
            document: None,
            min_confidence,
        }
    }

    pub fn with_section(mut self, metadata: SectionMetadata) -> Self {
        self.sections
            .insert(metadata.properties.section_id, Arc::new(metadata));
        self
    }

    pub fn with_document(mut self, document: DocumentMetadata) -> Self {
        self.document = Some(Arc::new(document));
        self
    }

    pub fn document(&self) -> Option<&DocumentMetadata> {
        self.document.as_deref()
    }

    pub fn section(&self, id: SectionId) -> Option<&SectionMetadata> {
        self.sections.get(&id).map(Arc::as_ref)
    }

    /// `(row_count, column_count)` from whichever cached listing knows the section.
    pub fn extents(&self, id: SectionId) -> Option<(u32, u32)> {
        self.sections
            .get(&id)
            .map(|m| m.properties.extents())
            .or_else(|| self.document()?.section(id).map(|p| p.extents()))
    }

    pub fn resolve(&self, reference: &RangeRef) -> Result<Resolution> {
        match reference {
            RangeRef::Grid(range) => Ok(Resolution::exact(*range)),
            RangeRef::A1 {
                section_id,
                notation,
            } => self.resolve_a1(reference, *section_id, notation),
            RangeRef::Named { name } => self.resolve_named(reference, name),
            RangeRef::Header {
                section_id,
                header,
                best_effort,
            } => self.resolve_header(reference, *section_id, header, *best_effort),
        }
    }

    fn resolve_a1(
        &self,
        reference: &RangeRef,
        section_id: Option<SectionId>,
        notation: &str,
    ) -> Result<Resolution> {
        let not_found = |reason: String| OpsError::RangeNotFound {
            intent_index: None,
            reference: reference.to_string(),
            reason,
        };
        let parsed = A1Range::parse(notation).map_err(|e| not_found(e.to_string()))?;

        let section = match (&parsed.sheet, section_id) {
            (Some(title), explicit) => {
                let document = self
                    .document()
                    .ok_or_else(|| not_found("document metadata is not loaded".into()))?;
                let found = document
                    .sections
                    .iter()
                    .find(|s| &s.title == title)
                    .or_else(|| {
                        document
                            .sections
                            .iter()
                            .find(|s| s.title.eq_ignore_ascii_case(title))
                    })
                    .ok_or_else(|| not_found(format!("no sheet titled '{title}'")))?;
                if let Some(explicit) = explicit
                    && explicit != found.section_id
                {
                    return Err(not_found(format!(
                        "sheet '{title}' is section {}, not {explicit}",
                        found.section_id
                    )));
                }
                found.section_id
            }
            (None, Some(id)) => id,
            (None, None) => return Err(not_found("no sheet prefix and no section_id".into())),
        };

        let extents = self.extents(section);
        let range = parsed
            .to_grid(section, extents)
            .map_err(|e| not_found(e.to_string()))?;
        Ok(Resolution::exact(range))
    }

    fn resolve_named(&self, reference: &RangeRef, name: &str) -> Result<Resolution> {
        let not_found = |reason: &str| OpsError::RangeNotFound {
            intent_index: None,
            reference: reference.to_string(),
            reason: reason.to_string(),
        };
        let document = self
            .document()
            .ok_or_else(|| not_found("document metadata is not loaded"))?;
        let named = document
            .named_ranges
            .iter()
            .find(|n| n.name == name)
            .or_else(|| {
                document
                    .named_ranges
                    .iter()
                    .find(|n| n.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| not_found("no such named range"))?;
        Ok(Resolution::exact(named.range))
    }

    fn resolve_header(
        &self,
        reference: &RangeRef,
        section_id: SectionId,
        header: &str,
        best_effort: bool,
    ) -> Result<Resolution> {
        let not_found = |reason: String| OpsError::RangeNotFound {
            intent_index: None,
            reference: reference.to_string(),
            reason,
        };
        let metadata = self
            .section(section_id)
            .ok_or_else(|| not_found(format!("metadata for section {section_id} is not loaded")))?;
        let props = &metadata.properties;
        let data_start = metadata.header_row_index + 1;
        if data_start >= props.row_count {
            return Err(not_found("no data rows below the header row".into()));
        }
        let column_range =
            |col: u32| GridRange::new(section_id, data_start, props.row_count, col, col + 1);

        let mut scored: Vec<(f64, u32, &str)> = metadata
            .header_row
            .iter()
            .enumerate()
            .filter_map(|(col, text)| {
                let score = header_score(header, text);
                (score > 0.0).then_some((score, col as u32, text.as_str()))
            })
            .collect();
        if scored.is_empty() {
            return Err(not_found("no header matches".into()));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let (best_score, best_col, best_text) = scored[0];
        let ties = scored.iter().filter(|s| s.0 == best_score).count();
        let confidence = best_score / ties as f64;

        let mut warnings = Vec::new();
        if ties > 1 {
            warnings.push(format!(
                "{ties} columns match '{header}' equally well; using the leftmost"
            ));
        }
        if best_score < 1.0 {
            warnings.push(format!(
                "'{header}' matched header '{best_text}' with score {best_score:.2}"
            ));
        }

        let candidates: Vec<RangeCandidate> = scored
            .iter()
            .take(5)
            .map(|(score, col, text)| RangeCandidate {
                range: column_range(*col),
                header: (*text).to_string(),
                confidence: *score,
            })
            .collect();

        if confidence < self.min_confidence {
            if !best_effort {
                return Err(OpsError::AmbiguousRange {
                    intent_index: None,
                    reference: reference.to_string(),
                    confidence,
                    candidates,
                });
            }
            warnings.push(format!(
                "accepted low-confidence match ({confidence:.2}) under best_effort"
            ));
        }

        debug!(%section_id, header, column = best_col, confidence, "resolved header reference");
        Ok(Resolution {
            range: column_range(best_col),
            confidence,
            warnings,
            candidates: if candidates.len() > 1 {
                candidates
            } else {
                Vec::new()
            },
        })
    }
}

fn collapse_ws_lower(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn alnum_lower(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn bigrams(s: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Sørensen–Dice coefficient over character bigrams.
fn dice(a: &str, b: &str) -> f64 {
    let left = bigrams(a);
    let mut right = bigrams(b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let total = left.len() + right.len();
    let mut shared = 0usize;
    for pair in &left {
        if let Some(pos) = right.iter().position(|p| p == pair) {
            right.swap_remove(pos);
            shared += 1;
        }
    }
    (2 * shared) as f64 / total as f64
}

/// Match tiers: exact 1.0, case/whitespace-insensitive 0.9,
/// punctuation-insensitive 0.8, prefix/contains 0.6, similarity at most 0.5.
pub fn header_score(query: &str, header: &str) -> f64 {
    if query == header {
        return 1.0;
    }
    if collapse_ws_lower(query) == collapse_ws_lower(header) {
        return 0.9;
    }
    let q = alnum_lower(query);
    let h = alnum_lower(header);
    if q.is_empty() || h.is_empty() {
        return 0.0;
    }
    if q == h {
        return 0.8;
    }
    if h.starts_with(&q) || q.starts_with(&h) || h.contains(&q) || q.contains(&h) {
        return 0.6;
    }
    let similarity = dice(&q, &h);
    if similarity >= 0.5 {
        similarity * 0.5
    } else {
        0.0
    }
}

pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub min_confidence: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 64,
            cache_ttl: Duration::from_secs(30),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

struct Cached<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn fresh(&self, ttl: Duration) -> Option<Arc<T>> {
        (self.fetched_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

/// Metadata cache in front of the provider. Entries are written only by
/// [`RangeResolver::prefetch`].
pub struct RangeResolver {
    provider: Arc<dyn SheetProvider>,
    limiter: Arc<RateLimiter>,
    config: ResolverConfig,
    sections: Mutex<LruCache<SectionId, Cached<SectionMetadata>>>,
    document: Mutex<Option<Cached<DocumentMetadata>>>,
}

impl RangeResolver {
    pub fn new(
        provider: Arc<dyn SheetProvider>,
        limiter: Arc<RateLimiter>,
        config: ResolverConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            provider,
            limiter,
            config,
            sections: Mutex::new(LruCache::new(capacity)),
            document: Mutex::new(None),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    /// Fetch whatever `needs` names that is missing or stale, and freeze it.
    ///
    /// A section the provider reports as missing is left out of the scope, so
    /// references into it fail at resolution with `RangeNotFound`.
    pub async fn prefetch(&self, needs: &MetadataNeeds) -> Result<ResolutionScope> {
        let mut scope = ResolutionScope::new(self.config.min_confidence);

        if needs.document {
            scope.document = self.document_metadata().await?;
        }
        for &id in &needs.sections {
            if let Some(metadata) = self.section_metadata(id).await? {
                scope.sections.insert(id, metadata);
            }
        }
        Ok(scope)
    }

    /// Prefetch everything a list of intents references.
    pub async fn prefetch_for(&self, intents: &[Intent]) -> Result<ResolutionScope> {
        let mut needs = MetadataNeeds::default();
        for intent in intents {
            intent.collect_metadata_needs(&mut needs);
        }
        self.prefetch(&needs).await
    }

    /// Prefetch and resolve a single reference.
    pub async fn resolve(&self, reference: &RangeRef) -> Result<Resolution> {
        let mut needs = MetadataNeeds::default();
        reference.collect_metadata_needs(&mut needs);
        self.prefetch(&needs).await?.resolve(reference)
    }

    async fn section_metadata(&self, id: SectionId) -> Result<Option<Arc<SectionMetadata>>> {
        let cached = self
            .sections
            .lock()
            .get(&id)
            .and_then(|entry| entry.fresh(self.config.cache_ttl));
        if let Some(hit) = cached {
            return Ok(Some(hit));
        }

        self.limiter.acquire(OperationClass::Read, 1).await?;
        let metadata = match self.provider.fetch_metadata(id).await {
            Ok(metadata) => Arc::new(metadata),
            Err(err) if err.kind == crate::errors::ProviderErrorKind::NotFound => {
                debug!(section_id = %id, "section missing during metadata prefetch");
                self.sections.lock().pop(&id);
                return Ok(None);
            }
            Err(err) => return Err(provider_failure(&self.limiter, OperationClass::Read, err)),
        };
        debug!(section_id = %id, "cached section metadata");
        self.sections.lock().put(
            id,
            Cached {
                value: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(Some(metadata))
    }

    async fn document_metadata(&self) -> Result<Option<Arc<DocumentMetadata>>> {
        let cached = self
            .document
            .lock()
            .as_ref()
            .and_then(|entry| entry.fresh(self.config.cache_ttl));
        if let Some(hit) = cached {
            return Ok(Some(hit));
        }

        self.limiter.acquire(OperationClass::Read, 1).await?;
        let document = Arc::new(
            self.provider
                .fetch_document()
                .await
                .map_err(|err| provider_failure(&self.limiter, OperationClass::Read, err))?,
        );
        *self.document.lock() = Some(Cached {
            value: document.clone(),
            fetched_at: Instant::now(),
        });
        Ok(Some(document))
    }

    /// Drop cached metadata after a dispatch changed structure.
    pub fn invalidate(&self, sections: impl IntoIterator<Item = SectionId>) {
        let mut cache = self.sections.lock();
        for id in sections {
            cache.pop(&id);
        }
        drop(cache);
        *self.document.lock() = None;
    }

    pub fn cached_sections(&self) -> usize {
        self.sections.lock().len()
    }
}
