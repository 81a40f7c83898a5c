//! # Worker process launching and exit classification.
//!
//! [`ProcessFactory`] is the seam between a channel and the OS. The production
//! implementation, [`CommandProcessFactory`], spawns a child with `tokio::process`,
//! forwards its stdout/stderr to `tracing` and keeps the last few stderr lines so
//! an unexpected exit can be explained.
//!
//! ## Environment passed to the worker
//! - [`ENV_WORKER_PORT`] port the worker must listen on (127.0.0.1)
//! - [`ENV_WORKER_ID`] channel id
//! - [`ENV_APP_ROOT`] application root directory

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::ChannelError;

/// Port the worker must listen on.
pub const ENV_WORKER_PORT: &str = "WORKERVISOR_WORKER_PORT";
/// Id of the channel that owns the worker.
pub const ENV_WORKER_ID: &str = "WORKERVISOR_WORKER_ID";
/// Application root directory.
pub const ENV_APP_ROOT: &str = "WORKERVISOR_APP_ROOT";

/// Exit code a worker uses to ask for a restart.
pub const INTENTIONAL_RESTART_EXIT_CODE: i32 = 200;

const STDERR_TAIL_LINES: usize = 3;
const FORWARDER_DRAIN: Duration = Duration::from_millis(100);

/// Everything a factory needs to launch one worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Channel id, exported as [`ENV_WORKER_ID`].
    pub worker_id: Arc<str>,
    /// Listen port, exported as [`ENV_WORKER_PORT`].
    pub port: u16,
    /// Application root, exported as [`ENV_APP_ROOT`].
    pub app_root: PathBuf,
}

/// How a worker process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` if terminated by a signal.
    pub code: Option<i32>,
    /// Last stderr lines, oldest first.
    pub stderr_tail: Vec<String>,
}

impl ProcessExit {
    /// `true` if the worker exited with [`INTENTIONAL_RESTART_EXIT_CODE`].
    pub fn is_restart_request(&self) -> bool {
        self.code == Some(INTENTIONAL_RESTART_EXIT_CODE)
    }

    /// Renders a fault message for this exit.
    pub fn describe(&self, program: &str) -> String {
        let mut msg = match self.code {
            Some(code) => format!("{program} exited with code {code} (0x{code:X})"),
            None => format!("{program} was terminated by a signal"),
        };
        if !self.stderr_tail.is_empty() {
            msg.push_str(": ");
            msg.push_str(&self.stderr_tail.join(","));
        }
        msg
    }
}

/// Handle to one running worker process.
#[async_trait]
pub trait WorkerProcess: Send + 'static {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// Name used in fault messages.
    fn program(&self) -> &str;

    /// Waits for the process to exit on its own.
    async fn wait(&mut self) -> ProcessExit;

    /// Kills the process and reaps it.
    async fn kill(&mut self);
}

/// Launches worker processes.
pub trait ProcessFactory: Send + Sync + 'static {
    /// Starts one worker. Must not block.
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, ChannelError>;
}

/// Launches an executable with `tokio::process`.
///
/// # Example
/// ```
/// use workervisor::CommandProcessFactory;
///
/// let factory = CommandProcessFactory::new("node")
///     .arg("server.js")
///     .env("NODE_ENV", "production");
/// assert_eq!(factory.program(), "node");
/// ```
#[derive(Debug, Clone)]
pub struct CommandProcessFactory {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandProcessFactory {
    /// Creates a factory for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an extra environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Executable name or path.
    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ProcessFactory for CommandProcessFactory {
    fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn WorkerProcess>, ChannelError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(ENV_WORKER_PORT, spec.port.to_string())
            .env(ENV_WORKER_ID, spec.worker_id.as_ref())
            .env(ENV_APP_ROOT, &spec.app_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if spec.app_root.is_dir() {
            cmd.current_dir(&spec.app_root);
        }

        let mut child = cmd.spawn().map_err(|e| ChannelError::Spawn {
            error: format!("{}: {e}", self.program),
        })?;
        tracing::debug!(worker = %spec.worker_id, pid = ?child.id(), program = %self.program, "worker process spawned");

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward(stdout, Arc::clone(&spec.worker_id), None));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward(stderr, Arc::clone(&spec.worker_id), Some(Arc::clone(&tail))));
        }

        Ok(Box::new(ChildProcess {
            child,
            program: self.program.clone(),
            tail,
            forwarders,
        }))
    }
}

struct ChildProcess {
    child: Child,
    program: String,
    tail: Arc<Mutex<VecDeque<String>>>,
    forwarders: Vec<JoinHandle<()>>,
}

impl ChildProcess {
    async fn drain_forwarders(&mut self) {
        for h in self.forwarders.drain(..) {
            let _ = tokio::time::timeout(FORWARDER_DRAIN, h).await;
        }
    }

    fn stderr_tail(&self) -> Vec<String> {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn program(&self) -> &str {
        &self.program
    }

    async fn wait(&mut self) -> ProcessExit {
        let code = match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "failed to wait for worker process");
                None
            }
        };
        self.drain_forwarders().await;
        ProcessExit {
            code,
            stderr_tail: self.stderr_tail(),
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(program = %self.program, error = %e, "worker process kill failed");
        }
        for h in self.forwarders.drain(..) {
            h.abort();
        }
    }
}

fn forward<R>(
    reader: R,
    worker: Arc<str>,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match &tail {
                Some(tail) => {
                    tracing::warn!(target: "workervisor::worker", worker = %worker, "{line}");
                    push_tail(&mut tail.lock().unwrap_or_else(PoisonError::into_inner), line);
                }
                None => tracing::info!(target: "workervisor::worker", worker = %worker, "{line}"),
            }
        }
    })
}

fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if line.trim().is_empty() {
        return;
    }
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}
