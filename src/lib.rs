//! Operation orchestration for remote, quota-limited spreadsheet services.
//!
//! Handlers describe work as typed [`Intent`]s. The engine resolves their
//! ranges, compiles them into one provider batch, checks the batch against a
//! safety [`Policy`], spends rate-limit budget, dispatches, and reports a diff
//! whose fidelity scales down with the size of the change. Multi-step work can
//! be grouped in pseudo-transactions with compensating rollback.

pub mod cli;
pub mod compiler;
pub mod config;
pub mod conflict;
pub mod diff;
pub mod dispatch;
pub mod errors;
pub mod intent;
pub mod model;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod rate_limit;
pub mod resolver;
pub mod snapshot;
pub mod transaction;

pub use compiler::{CompileOptions, CompiledBatch, compile};
pub use config::{CliArgs, OrchestratorConfig};
pub use conflict::{ConflictReport, ConflictResolution};
pub use diff::{DiffResult, DiffTier};
pub use dispatch::{DispatchOptions, DispatchResult};
pub use errors::{OpsError, ProviderError, Result};
pub use intent::Intent;
pub use orchestrator::{ExecuteOptions, Orchestrator, Preview};
pub use policy::{Policy, PolicyViolation};
pub use provider::{MemoryProvider, SheetProvider};
pub use resolver::RangeRef;
pub use transaction::{CommitOptions, TransactionId, TransactionState};
