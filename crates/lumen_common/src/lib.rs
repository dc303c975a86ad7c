//! Lumen Common - Shared types for the Lumen update agent.
//!
//! Everything the daemon and its collaborators agree on lives here:
//! the shared status record, the trusted target index, the version
//! ledger, agent configuration and the private agent state file.

pub mod config;
pub mod error;
pub mod index;
pub mod ledger;
pub mod state;
pub mod status;

pub use config::AgentConfig;
pub use error::UpdateError;
pub use index::{IndexEntry, TargetIndex};
pub use ledger::VersionLedger;
pub use state::{AgentState, CheckOutcome};
pub use status::{StatusStore, UpdateStatus};
