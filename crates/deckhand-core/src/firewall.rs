//! One-shot ufw setup for a target's published ports.
//!
//! SSH is allowed before the firewall is enabled, unconditionally. Enabling
//! ufw on a remote host without an SSH rule locks the operator out.

use crate::error::Result;
use crate::exec::Executor;
use crate::target::DeployTarget;
use std::process::Command;

pub fn run(target: &DeployTarget, exec: &mut Executor) -> Result<String> {
    exec.run(Command::new("ufw").args(["allow", "OpenSSH"]))?;

    for port in &target.firewall_ports {
        exec.run(Command::new("ufw").args(["allow", &format!("{port}/tcp")]))?;
    }

    exec.run(Command::new("ufw").args(["--force", "enable"]))?;

    Ok(format!(
        "firewall enabled, {} port(s) + SSH allowed",
        target.firewall_ports.len()
    ))
}
