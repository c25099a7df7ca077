use deckhand_core::exec::Executor;
use deckhand_core::state::DeployState;
use deckhand_core::sync;
use deckhand_core::target::DeployTarget;
use deckhand_core::Result;

pub fn mark(target: &DeployTarget, path: &str) -> Result<()> {
    let mut state = DeployState::load(&target.root)?;
    let msg = sync::mark_override(target, &mut state, path, &mut Executor::live())?;
    println!("{msg}");
    Ok(())
}

pub fn clear(target: &DeployTarget, path: &str) -> Result<()> {
    let mut state = DeployState::load(&target.root)?;
    let msg = sync::clear_override(target, &mut state, path, &mut Executor::live())?;
    println!("{msg}");
    Ok(())
}
