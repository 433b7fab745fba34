//! Command handlers.

pub mod config_cmd;
pub mod proxy;
pub mod run;
pub mod util;
