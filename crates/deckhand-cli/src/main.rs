mod cmd;
mod output;

use clap::Parser;
use deckhand_core::config::{Config, WarnLevel};
use deckhand_core::paths;
use deckhand_core::phase::RunMode;
use deckhand_core::DeployError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "deckhand",
    about = "Deploy orchestrator for git-sourced, systemd-managed project targets",
    version
)]
struct Cli {
    /// Target name from the fleet config (omit with --status to list all)
    target: Option<String>,

    /// Fleet config path
    #[arg(long, env = "DECKHAND_CONFIG", default_value = paths::DEFAULT_CONFIG)]
    config: PathBuf,

    /// Output as JSON
    #[arg(long, short = 'j')]
    json: bool,

    /// Walk every phase and report intended actions without performing any
    #[arg(long, group = "action")]
    dry_run: bool,

    /// Run preflight checks only
    #[arg(long, group = "action")]
    check: bool,

    /// Show unit and deploy state, for one target or the whole fleet
    #[arg(long, group = "action")]
    status: bool,

    /// Run post-deploy verification only
    #[arg(long, group = "action")]
    verify: bool,

    /// Roll back to the last known-good revision and snapshot
    #[arg(long, group = "action")]
    rollback: bool,

    /// Restart the target's units without deploying
    #[arg(long, group = "action")]
    restart_only: bool,

    /// Allow the target's ports (and SSH) through ufw and enable it
    #[arg(long, group = "action")]
    setup_firewall: bool,

    /// Mark a tracked file as a local override, baselined at HEAD
    #[arg(long, value_name = "PATH", group = "action")]
    mark_override: Option<String>,

    /// Clear an override mark, leaving the file's content as-is
    #[arg(long, value_name = "PATH", group = "action")]
    clear_override: Option<String>,

    /// Deploy without taking a fresh database snapshot
    #[arg(long)]
    skip_backup: bool,
}

fn main() {
    // Usage errors exit 1 like any other config problem; the non-1 codes
    // stay reserved for deploy failure classes. --help/--version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    // Logs go to stderr; stdout carries only the report (--json stays
    // machine-parseable).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(&cli) {
        eprintln!("error: {e}");
        if let Some(hint) = e.hint() {
            eprintln!("hint: {hint}");
        }
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: &Cli) -> deckhand_core::Result<()> {
    let config = load_config(&cli.config)?;

    if cli.status {
        return cmd::status::run(&config, cli.target.as_deref(), cli.json);
    }

    // Everything else operates on exactly one target.
    let name = cli.target.as_deref().ok_or_else(|| {
        DeployError::TargetNotFound("no target given (see --help)".to_string())
    })?;
    let target = config.target(name)?;

    if let Some(path) = &cli.mark_override {
        return cmd::overrides::mark(target, path);
    }
    if let Some(path) = &cli.clear_override {
        return cmd::overrides::clear(target, path);
    }
    if cli.setup_firewall {
        return cmd::firewall::run(target);
    }
    if cli.rollback {
        return cmd::rollback::run(target);
    }

    let mode = if cli.dry_run {
        RunMode::DryRun
    } else if cli.check {
        RunMode::Check
    } else if cli.verify {
        RunMode::VerifyOnly
    } else if cli.restart_only {
        RunMode::RestartOnly
    } else {
        RunMode::Full
    };

    cmd::deploy::run(target, &config.preflight, mode, cli.skip_backup, cli.json)
}

/// Load the fleet config and refuse to act on one with hard errors.
/// Warnings go to the log and the run proceeds.
fn load_config(path: &PathBuf) -> deckhand_core::Result<Config> {
    let config = Config::load(path)?;
    let mut fatal = Vec::new();
    for warning in config.validate() {
        match warning.level {
            WarnLevel::Warning => tracing::warn!("config: {}", warning.message),
            WarnLevel::Error => fatal.push(warning.message),
        }
    }
    if !fatal.is_empty() {
        return Err(DeployError::InvalidConfig(fatal));
    }
    Ok(config)
}
