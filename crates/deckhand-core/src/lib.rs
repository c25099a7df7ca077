pub mod backup;
pub mod config;
pub mod deps;
pub mod error;
pub mod exec;
pub mod firewall;
pub mod io;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod perms;
pub mod phase;
pub mod preflight;
pub mod report;
pub mod retry;
pub mod rollback;
pub mod service;
pub mod state;
pub mod sync;
pub mod target;
pub mod verify;

pub use error::{DeployError, Result};
