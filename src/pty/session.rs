//! A single PTY session
//!
//! One TTY exec into a running container. A writer task drains a bounded
//! channel into exec stdin; a reader task fans exec output out to attached
//! clients, the compressed history, and the registered output callback, in
//! that order. Clients are non-blocking: a slow client whose buffer fills is
//! detached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bollard::exec::StartExecResults;
use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};

use super::History;

/// Per-client outbound buffer depth. A client that falls this far behind is
/// detached rather than allowed to stall the fan-out.
const CLIENT_BUFFER: usize = 256;

/// Stdin channel depth.
const STDIN_BUFFER: usize = 256;

/// Callback invoked with every chunk read from the PTY.
pub type OutputCallback = Arc<dyn Fn(&str, &str, &[u8]) + Send + Sync>;

/// Snapshot of session metadata for the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub container_id: String,
    pub clients: usize,
    pub history_bytes: usize,
    pub running: bool,
}

/// Handle returned to an attached client.
pub struct ClientHandle {
    pub client_id: u64,
    pub rx: mpsc::Receiver<Bytes>,
}

pub struct PtySession {
    pub id: String,
    pub container_id: String,
    pub docker_id: String,
    exec_id: String,

    stdin_tx: mpsc::Sender<Bytes>,
    clients: Mutex<HashMap<u64, mpsc::Sender<Bytes>>>,
    next_client_id: AtomicU64,

    pub(crate) history: Arc<History>,
    running: AtomicBool,
    last_activity: Mutex<Instant>,

    pub(crate) cancel: CancellationToken,
}

impl PtySession {
    /// Spawn the reader and writer tasks over an attached exec stream and
    /// return the session.
    pub(crate) fn spawn(
        id: String,
        container_id: String,
        docker_id: String,
        exec_id: String,
        results: StartExecResults,
        history_cap: usize,
        output_callback: Option<OutputCallback>,
    ) -> Result<Arc<Self>> {
        let StartExecResults::Attached { output, mut input } = results else {
            return Err(ApiError::Internal("exec started detached".into()));
        };

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<Bytes>(STDIN_BUFFER);
        let cancel = CancellationToken::new();
        let history = Arc::new(History::new(history_cap));

        let session = Arc::new(Self {
            id: id.clone(),
            container_id: container_id.clone(),
            docker_id,
            exec_id,
            stdin_tx,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            history: history.clone(),
            running: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            cancel: cancel.clone(),
        });

        // Writer: single consumer of the stdin channel
        let writer_cancel = cancel.clone();
        let writer_session = session.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = stdin_rx.recv() => {
                        match msg {
                            Some(bytes) => {
                                if let Err(e) = input.write_all(&bytes).await {
                                    debug!("PTY {} stdin write failed: {}", writer_session.id, e);
                                    writer_cancel.cancel();
                                    break;
                                }
                                let _ = input.flush().await;
                            }
                            None => break,
                        }
                    }
                }
            }
            writer_session.running.store(false, Ordering::SeqCst);
        });

        // Reader: fan out every chunk to clients, history, callback
        let reader_cancel = cancel.clone();
        let reader_session = session.clone();
        let mut output = output;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break,
                    chunk = output.next() => {
                        match chunk {
                            Some(Ok(log)) => {
                                let bytes = log.into_bytes();
                                if bytes.is_empty() {
                                    continue;
                                }
                                reader_session.fan_out(&bytes, output_callback.as_ref());
                            }
                            Some(Err(e)) => {
                                debug!("PTY {} output stream error: {}", reader_session.id, e);
                                break;
                            }
                            None => {
                                debug!("PTY {} output stream ended", reader_session.id);
                                break;
                            }
                        }
                    }
                }
            }
            reader_session.running.store(false, Ordering::SeqCst);
            reader_cancel.cancel();
        });

        Ok(session)
    }

    /// Deliver one chunk: clients first, then history, then the callback.
    fn fan_out(&self, bytes: &Bytes, callback: Option<&OutputCallback>) {
        {
            let mut clients = self.clients.lock();
            let mut dead = Vec::new();
            for (client_id, tx) in clients.iter() {
                if tx.try_send(bytes.clone()).is_err() {
                    dead.push(*client_id);
                }
            }
            for client_id in dead {
                warn!(
                    "PTY {} detaching slow or gone client {}",
                    self.id, client_id
                );
                clients.remove(&client_id);
            }
        }

        self.history.push(bytes);

        if let Some(callback) = callback {
            (**callback)(&self.container_id, &self.id, bytes);
        }
    }

    /// Attach a client: it receives the history snapshot first, then live
    /// bytes in read order.
    pub fn attach(&self) -> ClientHandle {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);

        let snapshot = self.history.snapshot();

        let mut clients = self.clients.lock();
        if !snapshot.is_empty() {
            // Enqueued under the lock, so the replay lands ahead of any
            // chunk the fan-out delivers after us.
            let _ = tx.try_send(snapshot);
        }
        clients.insert(client_id, tx);
        drop(clients);

        self.touch();
        ClientHandle { client_id, rx }
    }

    pub fn detach(&self, client_id: u64) {
        self.clients.lock().remove(&client_id);
        self.touch();
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Write bytes to the PTY stdin. Fails deterministically once the
    /// session has stopped running.
    pub async fn write(&self, bytes: Bytes) -> Result<()> {
        if !self.is_running() {
            return Err(ApiError::PreconditionFailed(format!(
                "pty session {} is closed",
                self.id
            )));
        }

        self.touch();
        self.stdin_tx
            .send(bytes)
            .await
            .map_err(|_| ApiError::PreconditionFailed(format!("pty session {} is closed", self.id)))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Seconds since the last client traffic.
    pub fn idle_secs(&self) -> u64 {
        self.last_activity.lock().elapsed().as_secs()
    }

    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Stop the I/O tasks, drop all clients, and release the history.
    pub(crate) fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        self.clients.lock().clear();
        self.history.clear();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            container_id: self.container_id.clone(),
            clients: self.client_count(),
            history_bytes: self.history.raw_len(),
            running: self.is_running(),
        }
    }
}
