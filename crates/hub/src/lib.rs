pub mod hub;
pub mod instances;
pub mod pending;
pub mod registry;
pub mod server;

pub use hub::Hub;
pub use instances::{InstanceEndpoint, InstanceSummary};
pub use registry::{PageBackend, PageTargetRecord, PageTargetRegistry, RuntimeInfoUpdate};
