pub mod deploy;
pub mod firewall;
pub mod overrides;
pub mod rollback;
pub mod status;
