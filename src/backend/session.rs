//! A running tool backend: one child process plus its stdio plumbing.
//!
//! Each session owns its child exclusively. Writes to the child's stdin go
//! through a single writer task fed by a queue; a single reader task
//! demultiplexes stdout replies into per-call completion handles keyed by
//! request id. Stderr is drained into the log and never parsed.

use std::{
    process::Stdio,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

use crate::{
    backend::{
        config::BackendDescriptor,
        error::{BackendError, BackendResult},
        protocol::{CallToolParams, WireMethod, WireRequest, WireResponse},
    },
    protocols::chat::ToolSpec,
};

type PendingTable = Arc<DashMap<u64, oneshot::Sender<WireResponse>>>;

pub struct BackendSession {
    name: String,
    next_id: AtomicU64,
    pending: PendingTable,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    closed_rx: watch::Receiver<bool>,
    shutting_down: AtomicBool,
}

impl BackendSession {
    /// Launch the child described by `descriptor` and wire up its stdio.
    pub fn spawn(name: &str, descriptor: &BackendDescriptor) -> BackendResult<Self> {
        let mut command = Command::new(&descriptor.command);
        command
            .args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.workdir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| BackendError::SpawnFailed {
            backend: name.to_string(),
            reason: e.to_string(),
        })?;

        let mut stdin = child.stdin.take().expect("stdin piped");
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let pending: PendingTable = Arc::new(DashMap::new());
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (closed_tx, closed_rx) = watch::channel(false);

        // Writer: the only task touching stdin. Loop ends when all senders
        // are dropped, which closes the child's stdin.
        let writer_name = name.to_string();
        tokio::spawn(async move {
            while let Some(line) = writer_rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    debug!(backend = %writer_name, "Backend stdin closed, stopping writer");
                    break;
                }
            }
        });

        // Reader: the only task touching stdout, dispatching replies by id.
        let reader_name = name.to_string();
        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let reply: WireResponse = match serde_json::from_str(line) {
                            Ok(reply) => reply,
                            Err(e) => {
                                warn!(backend = %reader_name, error = %e, "Dropping malformed frame");
                                continue;
                            }
                        };
                        match reader_pending.remove(&reply.id) {
                            Some((id, tx)) => {
                                if tx.send(reply).is_err() {
                                    debug!(
                                        backend = %reader_name,
                                        id = id,
                                        "Discarding reply for orphaned call"
                                    );
                                }
                            }
                            None => {
                                warn!(
                                    backend = %reader_name,
                                    id = reply.id,
                                    "Dropping unsolicited or duplicate reply"
                                );
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        // Stderr drain: logged, never parsed.
        let stderr_name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(backend = %stderr_name, "stderr: {}", line);
            }
        });

        // Monitor: owns the child, reaps it on exit or on kill request, then
        // fails every pending call by dropping its completion handle.
        let monitor_name = name.to_string();
        let monitor_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => {
                            info!(backend = %monitor_name, status = %status, "Backend exited")
                        }
                        Err(e) => warn!(backend = %monitor_name, error = %e, "Backend wait failed"),
                    }
                }
                _ = kill_rx => {
                    warn!(backend = %monitor_name, "Force-terminating backend");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
            monitor_pending.clear();
            let _ = closed_tx.send(true);
        });

        Ok(Self {
            name: name.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            writer_tx: Mutex::new(Some(writer_tx)),
            kill_tx: Mutex::new(Some(kill_tx)),
            closed_rx,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves once the child has exited (for restart supervision).
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Issue one request and await its reply.
    ///
    /// No timeout is applied here; callers own their budgets. If the caller's
    /// future is dropped before the reply arrives, the pending entry stays
    /// behind as an orphan marker and the reader discards the late reply.
    pub async fn request(&self, method: WireMethod) -> BackendResult<WireResponse> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = WireRequest { id, method };
        let line = serde_json::to_string(&frame)
            .map_err(|e| BackendError::ToolFailed(format!("encode frame: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let sent = match self.writer_tx.lock().as_ref() {
            Some(writer) => writer.send(line).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.remove(&id);
            return Err(self.closed_error());
        }

        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => Err(self.closed_error()),
        }
    }

    pub async fn list_tools(&self) -> BackendResult<Vec<ToolSpec>> {
        let reply = self.request(WireMethod::ListTools).await?;
        reply.into_tool_specs().map_err(BackendError::ToolFailed)
    }

    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> BackendResult<String> {
        let reply = self
            .request(WireMethod::CallTool(CallToolParams {
                name: name.to_string(),
                arguments,
            }))
            .await?;
        reply.into_call_result().map_err(BackendError::ToolFailed)
    }

    /// Close stdin, wait up to `grace` for a clean exit, then force-terminate.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.writer_tx.lock().take();

        let mut closed = self.closed_rx.clone();
        if *closed.borrow() {
            return;
        }
        if tokio::time::timeout(grace, closed.changed()).await.is_err() {
            if let Some(kill) = self.kill_tx.lock().take() {
                let _ = kill.send(());
            }
            let _ = tokio::time::timeout(Duration::from_secs(1), closed.changed()).await;
        }
    }

    fn closed_error(&self) -> BackendError {
        if self.shutting_down.load(Ordering::SeqCst) {
            BackendError::Shutdown
        } else {
            BackendError::BackendCrashed {
                backend: self.name.clone(),
            }
        }
    }
}
