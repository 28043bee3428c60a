use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::scaler::{Decision, Scaler};
use super::REQUEST_SIGNAL;

#[derive(Debug)]
pub enum WorkerEvent {
    Request,
    Exited {
        id: usize,
        status: Option<ExitStatus>,
    },
}

/// Starts one worker and feeds its events back to the coordinator.
///
/// Every launched worker must eventually produce exactly one `Exited`,
/// including after `shutdown` flips to true.
pub trait Launcher: Send + Sync {
    fn launch(
        &self,
        id: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()>;
}

/// Runs each worker as `<current executable> worker --id N`.
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn current() -> std::io::Result<Self> {
        Ok(Self {
            exe: std::env::current_exe()?,
        })
    }
}

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        id: usize,
        events: mpsc::UnboundedSender<WorkerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let mut child = Command::new(&self.exe)
            .arg("worker")
            .arg("--id")
            .arg(id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout not captured"))?;

        info!("Started worker {} (pid {:?})", id, child.id());
        tokio::spawn(monitor(id, child, stdout, events, shutdown));
        Ok(())
    }
}

/// Forward request signals until the worker's stdout closes, then report its exit.
async fn monitor(
    id: usize,
    mut child: Child,
    stdout: tokio::process::ChildStdout,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line == REQUEST_SIGNAL => {
                    let _ = events.send(WorkerEvent::Request);
                }
                Ok(Some(other)) => debug!("Worker {} wrote unexpected line: {}", id, other),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read from worker {}: {}", id, e);
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    if let Err(e) = child.start_kill() {
                        debug!("Worker {} already gone: {}", id, e);
                    }
                    break;
                }
            }
        }
    }

    let status = match child.wait().await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!("Failed to wait on worker {}: {}", id, e);
            None
        }
    };
    let _ = events.send(WorkerEvent::Exited { id, status });
}

/// Owns the worker pool: launches it, samples load, replaces exits.
pub struct Coordinator<L: Launcher> {
    launcher: L,
    scaler: Scaler,
    interval: Duration,
    next_id: usize,
}

impl<L: Launcher> Coordinator<L> {
    pub fn new(launcher: L, scaler: Scaler, interval: Duration) -> Self {
        Self {
            launcher,
            scaler,
            interval,
            next_id: 0,
        }
    }

    fn launch(
        &mut self,
        events: &mpsc::UnboundedSender<WorkerEvent>,
        shutdown: &watch::Receiver<bool>,
    ) {
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = self.launcher.launch(id, events.clone(), shutdown.clone()) {
            error!("Failed to start worker {}: {}", id, e);
            self.scaler.on_launch_failed();
        }
    }

    /// Run until `shutdown` resolves and every worker has exited.
    ///
    /// Returns the pool size reached before draining.
    pub async fn run<S>(mut self, shutdown: S) -> usize
    where
        S: Future<Output = ()>,
    {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        for _ in 0..self.scaler.size() {
            self.launch(&events_tx, &stop_rx);
        }
        info!("Worker pool started with {} workers", self.scaler.size());

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    let observed = self.scaler.observed();
                    if self.scaler.on_tick() == Decision::Grow {
                        info!(
                            "{} requests in the last interval; growing pool to {}",
                            observed,
                            self.scaler.size()
                        );
                        self.launch(&events_tx, &stop_rx);
                    }
                }
                Some(event) = events.recv() => match event {
                    WorkerEvent::Request => self.scaler.on_request(),
                    WorkerEvent::Exited { id, status } => {
                        warn!("Worker {} exited ({:?}); starting a replacement", id, status);
                        if self.scaler.on_exit() == Decision::Replace {
                            self.launch(&events_tx, &stop_rx);
                        }
                    }
                },
            }
        }

        let reached = self.scaler.size();
        info!("Stopping {} workers", reached);
        self.scaler.drain();
        let _ = stop_tx.send(true);

        while !self.scaler.is_drained() {
            match events.recv().await {
                Some(WorkerEvent::Exited { id, .. }) => {
                    debug!("Worker {} stopped", id);
                    self.scaler.on_exit();
                }
                Some(WorkerEvent::Request) => {}
                None => break,
            }
        }

        info!("Worker pool stopped");
        reached
    }
}
