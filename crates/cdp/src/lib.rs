//! Remote-debugging automation layer: transient CDP sessions that attach
//! to exactly one already-open page inside the desktop host.

pub mod client;
pub mod collectors;
pub mod input;
pub mod session;
pub mod snapshot;
pub mod targets;

pub use client::CdpClient;
pub use collectors::SharedRecords;
pub use session::{with_page, SessionParams};
pub use targets::{fetch_targets, pick_exact, wait_for_target, TargetInfo};
