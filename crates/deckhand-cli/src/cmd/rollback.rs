use deckhand_core::orchestrator;
use deckhand_core::target::DeployTarget;
use deckhand_core::Result;

pub fn run(target: &DeployTarget) -> Result<()> {
    let msg = orchestrator::run_rollback(target)?;
    println!("{msg}");
    Ok(())
}
