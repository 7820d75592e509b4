pub mod hub_cmd;
pub mod onboard;
pub mod runtime_cmd;
pub mod status_cmd;
