//! Session governance.
//!
//! Every session-scoped operation passes [`SessionGovernor`] first. Checks
//! run lazily on each request in a fixed order: persisted termination,
//! max lifetime, idle timeout, quota, then exec concurrency. There is no
//! background sweep, so an expired session that nobody touches keeps its
//! container until the next request reaches it.

mod config;
mod error;
mod events;
mod governor;
mod state;

pub use config::GovernanceConfig;
pub use error::{GovernanceError, GovernanceResult};
pub use events::{GovernanceEvent, GovernanceEventRepository};
pub use governor::{SessionGovernor, TerminationReason};
pub use state::{ExecPermit, GovernanceState};
