pub mod config;
pub mod error;
pub mod paths;
pub mod protocol;
pub mod records;
pub mod urlnorm;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use protocol::{
    AckFrame, Bounds, Capabilities, ClientMessage, CommandFrame, CommandKind, Hello, ServerMessage,
};
pub use records::{ConsoleRecord, NetworkRecord, RecordStores};
