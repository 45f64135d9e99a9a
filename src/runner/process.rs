//! Subprocess supervision with signal forwarding.
//!
//! Runner commands are spawned with this process's stdio attached, so the
//! test framework's output streams straight into the CI log. While the child
//! runs, a single forwarding task relays signals delivered to this process
//! (Ctrl-C, `SIGTERM` from the agent on cancellation, ...) to the child, so
//! the framework gets the chance to shut down cleanly. When the child exits
//! the process gets its previous signal handling back.
//!
//! ```text
//!   CI agent ──SIGTERM──► bktec ──forward──► test runner
//!                           │                    │
//!                           └──── wait() ◄───────┘
//!                                  │
//!                    exit 0 / Exited{code} / Signaled{signal}
//! ```

use std::process::{ExitStatus, Output, Stdio};

#[cfg(unix)]
use nix::libc;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::command::CommandSpec;

pub type ProcessResult<T> = Result<T, ProcessError>;

/// Ways a supervised subprocess can fail.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child ran to completion with a non-zero status.
    #[error("`{program}` exited with status {code}")]
    Exited { program: String, code: i32 },

    /// The child was terminated by a signal.
    #[error("`{program}` was terminated by signal {signal}")]
    Signaled { program: String, signal: i32 },
}

impl ProcessError {
    /// The exit code, if the child exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Exited { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The terminating signal, if the child was killed by one.
    pub fn signal(&self) -> Option<i32> {
        match self {
            ProcessError::Signaled { signal, .. } => Some(*signal),
            _ => None,
        }
    }
}

/// Signal state of this process, shared by every supervised child.
///
/// Only one child is supervised at a time; the lock is held for the child's
/// whole lifetime.
static FOREGROUND: tokio::sync::Mutex<Dispositions> =
    tokio::sync::Mutex::const_new(Dispositions::new());

/// Runs `command` with inherited stdio, forwarding signals to it until it
/// exits.
///
/// Once the child has exited the signal dispositions this process had before
/// are restored, so a signal arriving between children takes its usual
/// effect.
pub async fn run_and_forward_signal(command: &CommandSpec) -> ProcessResult<()> {
    let mut dispositions = FOREGROUND.lock().await;
    supervise(command, &mut dispositions).await
}

async fn supervise(command: &CommandSpec, dispositions: &mut Dispositions) -> ProcessResult<()> {
    println!("{}", command);

    let listeners = dispositions.take_over();

    let spawned = build(command)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => {
            dispositions.restore();
            return Err(ProcessError::Spawn {
                program: command.program.clone(),
                source,
            });
        }
    };

    let finished = CancellationToken::new();
    let forwarder = child
        .id()
        .map(|pid| tokio::spawn(forward_signals(pid, listeners, finished.clone())));

    let status = child.wait().await;

    finished.cancel();
    if let Some(handle) = forwarder {
        let _ = handle.await;
    }
    dispositions.restore();

    let status = status.map_err(|source| ProcessError::Wait {
        program: command.program.clone(),
        source,
    })?;

    check_status(&command.program, status)
}

/// Runs `command` to completion, capturing stdout and stderr.
///
/// Used for auxiliary invocations (dry runs, package listing) whose output
/// is consumed rather than shown. A non-zero exit is not an error here; the
/// caller inspects [`Output::status`].
pub async fn run_captured(command: &CommandSpec) -> ProcessResult<Output> {
    debug!("Running `{}`", command);

    build(command)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            program: command.program.clone(),
            source,
        })
}

/// Maps an exit status to `Ok` on success or a typed error otherwise.
pub fn check_status(program: &str, status: ExitStatus) -> ProcessResult<()> {
    if status.success() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ProcessError::Signaled {
                program: program.to_string(),
                signal,
            });
        }
    }

    Err(ProcessError::Exited {
        program: program.to_string(),
        code: status.code().unwrap_or(-1),
    })
}

fn build(command: &CommandSpec) -> Command {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args).envs(&command.env);
    cmd
}

#[cfg(unix)]
const FORWARDED_SIGNALS: &[i32] = &[
    libc::SIGINT,
    libc::SIGTERM,
    libc::SIGHUP,
    libc::SIGQUIT,
    libc::SIGUSR1,
    libc::SIGUSR2,
    libc::SIGWINCH,
    libc::SIGALRM,
    libc::SIGPIPE,
];

#[cfg(unix)]
type Listeners = Vec<(i32, tokio::signal::unix::Signal)>;

#[cfg(not(unix))]
type Listeners = ();

/// What a forwarded signal did before forwarding took it over, and the
/// forwarding handler while it is parked between children.
#[cfg(unix)]
struct Saved {
    original: libc::sigaction,
    forwarding: Option<libc::sigaction>,
}

/// Per-signal dispositions, switched between the process's own and the
/// forwarding handlers around each child.
///
/// tokio installs its handler once and never removes it, so between
/// children the handler is swapped out with `sigaction` and swapped back in
/// for the next child.
struct Dispositions {
    #[cfg(unix)]
    saved: std::collections::BTreeMap<i32, Saved>,
}

#[cfg(unix)]
impl Dispositions {
    const fn new() -> Self {
        Self {
            saved: std::collections::BTreeMap::new(),
        }
    }

    /// Installs the forwarding handlers and registers a listener for each
    /// forwarded signal.
    fn take_over(&mut self) -> Listeners {
        use tokio::signal::unix::{SignalKind, signal};

        let mut listeners = Vec::with_capacity(FORWARDED_SIGNALS.len());
        for &raw in FORWARDED_SIGNALS {
            let original = if self.saved.contains_key(&raw) {
                None
            } else {
                current_action(raw)
            };

            match signal(SignalKind::from_raw(raw)) {
                Ok(listener) => listeners.push((raw, listener)),
                Err(e) => {
                    debug!("Not forwarding signal {}: {}", raw, e);
                    continue;
                }
            }

            match self.saved.get(&raw) {
                Some(saved) => {
                    if let Some(forwarding) = &saved.forwarding {
                        set_action(raw, forwarding);
                    }
                }
                None => {
                    if let Some(original) = original {
                        self.saved.insert(
                            raw,
                            Saved {
                                original,
                                forwarding: None,
                            },
                        );
                    }
                }
            }
        }
        listeners
    }

    /// Puts the original dispositions back, parking the forwarding handlers.
    fn restore(&mut self) {
        for (&raw, saved) in self.saved.iter_mut() {
            if let Some(forwarding) = set_action(raw, &saved.original) {
                saved.forwarding = Some(forwarding);
            }
        }
    }
}

#[cfg(not(unix))]
impl Dispositions {
    const fn new() -> Self {
        Self {}
    }

    fn take_over(&mut self) -> Listeners {}

    fn restore(&mut self) {}
}

/// Reads the current disposition of `raw` without changing it.
#[cfg(unix)]
fn current_action(raw: i32) -> Option<libc::sigaction> {
    let mut action = std::mem::MaybeUninit::<libc::sigaction>::zeroed();
    // SAFETY: a null new action only reads the disposition into `action`.
    let rc = unsafe { libc::sigaction(raw, std::ptr::null(), action.as_mut_ptr()) };
    if rc != 0 {
        debug!(
            "Cannot read disposition of signal {}: {}",
            raw,
            std::io::Error::last_os_error()
        );
        return None;
    }
    // SAFETY: sigaction filled `action` in.
    Some(unsafe { action.assume_init() })
}

/// Installs `action` for `raw`, returning the disposition it replaced.
#[cfg(unix)]
fn set_action(raw: i32, action: &libc::sigaction) -> Option<libc::sigaction> {
    let mut previous = std::mem::MaybeUninit::<libc::sigaction>::zeroed();
    // SAFETY: `action` was read back from sigaction for this same signal.
    let rc = unsafe { libc::sigaction(raw, action, previous.as_mut_ptr()) };
    if rc != 0 {
        debug!(
            "Cannot set disposition of signal {}: {}",
            raw,
            std::io::Error::last_os_error()
        );
        return None;
    }
    // SAFETY: sigaction filled `previous` in.
    Some(unsafe { previous.assume_init() })
}

/// Relays signals received by this process to `pid` until `finished` is
/// cancelled. Each signal is forwarded as received. `SIGCHLD` is never
/// listened for, so the child's own exit notification is not echoed back to
/// it.
#[cfg(unix)]
async fn forward_signals(pid: u32, mut listeners: Listeners, finished: CancellationToken) {
    use std::task::Poll;

    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);

    loop {
        let received = std::future::poll_fn(|cx| {
            for (raw, listener) in listeners.iter_mut() {
                if let Poll::Ready(Some(())) = listener.poll_recv(cx) {
                    return Poll::Ready(*raw);
                }
            }
            Poll::Pending
        });

        tokio::select! {
            _ = finished.cancelled() => break,
            raw = received => {
                debug!("Forwarding signal {} to child {}", raw, pid);
                if let Ok(signal) = Signal::try_from(raw) {
                    let _ = kill(pid, signal);
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_signals(_pid: u32, _listeners: Listeners, finished: CancellationToken) {
    finished.cancelled().await;
}
