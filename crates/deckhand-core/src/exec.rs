//! Mutation gateway for deploy phases.
//!
//! Every state-changing operation, external command or filesystem edit,
//! goes through an [`Executor`]. In live mode it performs the operation; in
//! dry-run mode the same call site records what it would have done and
//! returns a synthesized success. That keeps the dry-run report truthful:
//! the code path that reports an action is the one that performs it.
//!
//! Read-only probes use [`Executor::query`], which always executes live.

use crate::error::{DeployError, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Default bound for external commands; long-running steps (fetch, pip,
/// backup) pass their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// True when the command was not actually run (dry-run).
    pub synthesized: bool,
}

impl CmdOutput {
    fn synthesized() -> Self {
        Self {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
            synthesized: true,
        }
    }

    pub fn success(&self) -> bool {
        self.code == 0
    }
}

pub struct Executor {
    dry_run: bool,
    planned: Vec<String>,
}

impl Executor {
    pub fn live() -> Self {
        Self {
            dry_run: false,
            planned: Vec::new(),
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            planned: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Actions recorded during a dry run, in execution order.
    pub fn planned(&self) -> &[String] {
        &self.planned
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Run a mutating command with the default timeout. Non-zero exit is an
    /// error; phases map it into their own failure class.
    pub fn run(&mut self, cmd: &mut Command) -> Result<CmdOutput> {
        self.run_with_timeout(cmd, DEFAULT_TIMEOUT)
    }

    pub fn run_with_timeout(&mut self, cmd: &mut Command, timeout: Duration) -> Result<CmdOutput> {
        let desc = describe(cmd);
        if self.dry_run {
            tracing::info!("would run: {desc}");
            self.planned.push(desc);
            return Ok(CmdOutput::synthesized());
        }
        tracing::debug!("running: {desc}");
        let out = run_live(cmd, timeout)?;
        if !out.success() {
            return Err(DeployError::CommandFailed {
                program: desc,
                code: out.code,
                stderr: out.stderr.trim().to_string(),
            });
        }
        Ok(out)
    }

    /// Run a read-only probe. Executes live in every mode; non-zero exit is
    /// reported in the output, not as an error, since several probes (e.g.
    /// `systemctl is-active`, `git diff --quiet`) signal through it.
    pub fn query(&self, cmd: &mut Command) -> Result<CmdOutput> {
        let desc = describe(cmd);
        tracing::debug!("probing: {desc}");
        run_live(cmd, DEFAULT_TIMEOUT)
    }

    // -----------------------------------------------------------------------
    // Filesystem mutations
    // -----------------------------------------------------------------------

    pub fn write_file(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        if self.record(format!("write {} ({} bytes)", path.display(), data.len())) {
            return Ok(());
        }
        crate::io::atomic_write(path, data)
    }

    pub fn copy_file(&mut self, from: &Path, to: &Path) -> Result<()> {
        if self.record(format!("copy {} -> {}", from.display(), to.display())) {
            return Ok(());
        }
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from, to)?;
        Ok(())
    }

    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        if self.record(format!("remove {}", path.display())) {
            return Ok(());
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    pub fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        if self.record(format!("mkdir -p {}", path.display())) {
            return Ok(());
        }
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    #[cfg(unix)]
    pub fn set_mode(&mut self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        if self.record(format!("chmod {:o} {}", mode, path.display())) {
            return Ok(());
        }
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(mode);
        std::fs::set_permissions(path, perms)?;
        Ok(())
    }

    /// Record an action in dry-run mode. Returns true when the caller must
    /// skip the real operation. Public for in-process mutations (e.g. the
    /// SQLite online backup) that don't go through a Command.
    pub fn record(&mut self, desc: String) -> bool {
        if self.dry_run {
            tracing::info!("would: {desc}");
            self.planned.push(desc);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Live execution with a bounded timeout
// ---------------------------------------------------------------------------

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn run_live(cmd: &mut Command, timeout: Duration) -> Result<CmdOutput> {
    let program = describe(cmd);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeployError::ToolNotFound(program.clone())
        } else {
            DeployError::Io(e)
        }
    })?;

    // Drain pipes on threads so a chatty child can't deadlock on a full pipe
    // while we poll for exit.
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let out_handle = std::thread::spawn(move || drain(stdout));
    let err_handle = std::thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(DeployError::CommandTimeout {
                    program,
                    seconds: timeout.as_secs(),
                });
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    };

    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();

    Ok(CmdOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        synthesized: false,
    })
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn query_captures_output_and_nonzero_exit() {
        let exec = Executor::live();
        let out = exec
            .query(Command::new("sh").args(["-c", "echo hi; exit 3"]))
            .unwrap();
        assert_eq!(out.code, 3);
        assert_eq!(out.stdout.trim(), "hi");
        assert!(!out.synthesized);
    }

    #[test]
    fn run_fails_on_nonzero_exit() {
        let mut exec = Executor::live();
        let err = exec
            .run(Command::new("sh").args(["-c", "echo boom >&2; exit 1"]))
            .unwrap_err();
        match err {
            DeployError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 1);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn run_times_out_and_kills_the_child() {
        let mut exec = Executor::live();
        let err = exec
            .run_with_timeout(
                Command::new("sleep").arg("30"),
                Duration::from_millis(100),
            )
            .unwrap_err();
        assert!(matches!(err, DeployError::CommandTimeout { .. }));
    }

    #[test]
    fn missing_program_is_tool_not_found() {
        let mut exec = Executor::live();
        let err = exec
            .run(&mut Command::new("deckhand-no-such-binary"))
            .unwrap_err();
        assert!(matches!(err, DeployError::ToolNotFound(_)));
    }

    #[test]
    fn dry_run_records_and_synthesizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        let mut exec = Executor::dry_run();

        let out = exec
            .run(Command::new("rm").arg("-rf").arg("/should/never/run"))
            .unwrap();
        assert!(out.synthesized);
        exec.write_file(&path, b"data").unwrap();
        exec.create_dir_all(&dir.path().join("sub")).unwrap();

        // No filesystem mutation happened.
        assert!(!path.exists());
        assert!(!dir.path().join("sub").exists());

        assert_eq!(exec.planned().len(), 3);
        assert!(exec.planned()[0].starts_with("rm -rf"));
    }

    #[test]
    fn dry_run_query_still_executes() {
        let exec = Executor::dry_run();
        let out = exec
            .query(Command::new("sh").args(["-c", "echo probe"]))
            .unwrap();
        assert_eq!(out.stdout.trim(), "probe");
        assert!(!out.synthesized);
    }

    #[cfg(unix)]
    #[test]
    fn set_mode_applies_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, b"x").unwrap();
        let mut exec = Executor::live();
        exec.set_mode(&path, 0o600).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
