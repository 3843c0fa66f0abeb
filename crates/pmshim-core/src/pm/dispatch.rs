//! Process dispatcher.
//!
//! Runs one binary of an installed release as a child process and reports
//! its exit code. Standard streams are inherited when the caller passes its
//! own; anything else is piped and relayed.

use super::definition::BinSpec;
use super::descriptor::Locator;
use super::error::PmError;
use super::store::{InstalledRelease, Payload};
use super::supervisor::ProcessSupervisor;
use crate::config::{NODE_ENV, ROOT_ENV};
use crate::paths::self_root;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// Exit code reported when the child was terminated by a signal.
const EXIT_SIGNALED: i32 = 1;

/// Extensions run through the Node interpreter.
const JS_EXTENSIONS: [&str; 3] = ["js", "cjs", "mjs"];

/// Where the child's stdin comes from.
pub enum Input<'a> {
    /// Our own stdin.
    Inherit,
    /// Piped from this reader until it ends or the child exits.
    Reader(Box<dyn AsyncRead + Send + Unpin + 'a>),
}

/// Where the child's stdout or stderr goes.
pub enum Output<'a> {
    /// Our own stream.
    Inherit,
    /// Piped into this writer.
    Writer(Box<dyn AsyncWrite + Send + Unpin + 'a>),
}

/// Stdio wiring and working directory for a child.
pub struct IoContext<'a> {
    pub stdin: Input<'a>,
    pub stdout: Output<'a>,
    pub stderr: Output<'a>,
    /// Working directory; defaults to ours.
    pub cwd: Option<PathBuf>,
}

impl IoContext<'_> {
    /// Inherit all three streams.
    #[must_use]
    pub fn inherit() -> Self {
        Self {
            stdin: Input::Inherit,
            stdout: Output::Inherit,
            stderr: Output::Inherit,
            cwd: None,
        }
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl Default for IoContext<'_> {
    fn default() -> Self {
        Self::inherit()
    }
}

/// Absolute path of `bin_name` inside an installed release.
///
/// List-form bins live in the single downloaded file, or at `<bin>.js` for
/// archives; map-form bins at their declared relative path.
///
/// # Errors
/// Returns `PM_BIN_NOT_DECLARED` if the release does not declare `bin_name`.
pub fn resolve_bin(
    installed: &InstalledRelease,
    locator: &Locator,
    bin_name: &str,
) -> Result<PathBuf, PmError> {
    let not_declared = || PmError::bin_not_declared(bin_name, &locator.name, &locator.reference);

    let relative = match &installed.spec.bin {
        BinSpec::List(names) => {
            if !names.iter().any(|n| n == bin_name) {
                return Err(not_declared());
            }
            match Payload::from_url(&installed.spec.download_url(&locator.reference)) {
                Payload::SingleFile { file_name } => file_name,
                Payload::Archive => format!("{bin_name}.js"),
            }
        }
        BinSpec::Map(map) => map.get(bin_name).cloned().ok_or_else(not_declared)?,
    };

    Ok(installed.location.join(relative))
}

/// Run `bin_name` from `installed` with `args`; returns the child's exit code.
///
/// # Errors
/// Returns an error if the binary is not declared, no interpreter is found
/// for a JavaScript entry point, or the process cannot be spawned.
pub async fn run(
    supervisor: &ProcessSupervisor,
    installed: &InstalledRelease,
    locator: &Locator,
    bin_name: &str,
    args: &[String],
    io: IoContext<'_>,
) -> Result<i32, PmError> {
    let entry = resolve_bin(installed, locator, bin_name)?;
    let mut command = command_for(&entry)?;
    command.args(args);

    if let Some(root) = self_root() {
        command.env(ROOT_ENV, root);
    }
    let IoContext {
        stdin,
        stdout,
        stderr,
        cwd,
    } = io;
    if let Some(cwd) = &cwd {
        command.current_dir(cwd);
    }

    command.stdin(match stdin {
        Input::Inherit => Stdio::inherit(),
        Input::Reader(_) => Stdio::piped(),
    });
    command.stdout(stdio_for(&stdout));
    command.stderr(stdio_for(&stderr));

    debug!(locator = %locator, bin = bin_name, entry = %entry.display(), "Spawning package manager");

    let mut child = command.spawn().map_err(|e| {
        PmError::spawn_failed(format!("Failed to spawn '{}': {e}", entry.display()))
    })?;
    let guard = child.id().map(|pid| supervisor.track(pid));

    let stdin_pipe = child.stdin.take();
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    // Untrack as soon as the child is reaped; its pid may be reused while
    // a grandchild still holds the output pipes open.
    let reaped = async {
        let status = child.wait().await;
        drop(guard);
        status
    };

    let finished = async {
        let (status, stdout_relay, stderr_relay) = tokio::join!(
            reaped,
            relay_output(stdout_pipe, stdout),
            relay_output(stderr_pipe, stderr),
        );
        for result in [stdout_relay, stderr_relay] {
            if let Err(e) = result {
                debug!(error = %e, "Output relay ended early");
            }
        }
        status
    };
    tokio::pin!(finished);

    // Stop feeding stdin once the child is gone
    let status = tokio::select! {
        status = &mut finished => status,
        () = relay_input(stdin, stdin_pipe) => finished.await,
    };

    let status = status
        .map_err(|e| PmError::spawn_failed(format!("Failed to wait for '{}': {e}", entry.display())))?;

    let code = status.code().unwrap_or_else(|| {
        debug!(%status, "Package manager terminated by signal");
        EXIT_SIGNALED
    });
    debug!(locator = %locator, code, "Package manager exited");

    Ok(code)
}

fn stdio_for(output: &Output<'_>) -> Stdio {
    match output {
        Output::Inherit => Stdio::inherit(),
        Output::Writer(_) => Stdio::piped(),
    }
}

fn command_for(entry: &Path) -> Result<Command, PmError> {
    let is_js = entry
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| JS_EXTENSIONS.contains(&ext));

    if !is_js {
        return Ok(Command::new(entry));
    }

    let mut command = Command::new(node_binary()?);
    command.arg(entry);
    Ok(command)
}

/// The Node interpreter: `PMSHIM_NODE`, else `node` on `PATH`.
fn node_binary() -> Result<PathBuf, PmError> {
    if let Some(node) = std::env::var_os(NODE_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(node));
    }
    which::which("node").map_err(|e| {
        PmError::spawn_failed(format!("Cannot find a Node.js interpreter on PATH: {e}"))
    })
}

async fn relay_input<W>(input: Input<'_>, pipe: Option<W>)
where
    W: AsyncWrite + Unpin,
{
    let (Input::Reader(mut reader), Some(mut pipe)) = (input, pipe) else {
        return;
    };
    if let Err(e) = tokio::io::copy(&mut reader, &mut pipe).await {
        debug!(error = %e, "Input relay ended early");
    }
    // Dropping the pipe closes the child's stdin
    let _ = pipe.shutdown().await;
}

async fn relay_output<R>(pipe: Option<R>, output: Output<'_>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let (Some(mut pipe), Output::Writer(mut writer)) = (pipe, output) else {
        return Ok(());
    };
    tokio::io::copy(&mut pipe, &mut writer).await?;
    writer.flush().await
}
