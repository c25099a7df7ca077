use deckhand_core::exec::Executor;
use deckhand_core::firewall;
use deckhand_core::target::DeployTarget;
use deckhand_core::Result;

pub fn run(target: &DeployTarget) -> Result<()> {
    let msg = firewall::run(target, &mut Executor::live())?;
    println!("{msg}");
    Ok(())
}
