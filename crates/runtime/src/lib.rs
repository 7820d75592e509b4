//! Desktop-side runtime: the reconnecting control-channel client and the
//! browser view manager it dispatches into.

pub mod backoff;
pub mod client;
pub mod netstats;
pub mod pool;
pub mod status;
pub mod views;

pub use backoff::Backoff;
pub use client::RuntimeClient;
pub use netstats::{NetStats, NetStatsSnapshot};
pub use pool::{UpsertOutcome, ViewPool};
pub use status::{LoadState, PageEvent, StatusSnapshot, ViewStatus};
pub use views::{EnsureResult, NullHost, ViewEvent, ViewHost, ViewManager};
