//! Per-PTY monitoring session
//!
//! State machine: disabled → enabled → (silence-armed ⇄ active) →
//! terminated. A deadline timer fires the active strategy once the silence
//! threshold elapses; dispatch is single-flight, and output arriving during
//! a dispatch is buffered into the ring without resetting the timer until
//! the dispatch returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::MonitorNotice;

use super::strategy::{Action, SilenceContext, Strategy};
use super::ContextRing;

/// One dispatch outcome handed to the effects sink for logging.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    pub container_id: String,
    pub session_id: String,
    pub strategy: String,
    pub action: String,
    pub command: Option<String>,
    pub context_snippet: Option<String>,
    pub ai_response: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Side effects a dispatch can have. The manager implements this against the
/// PTY manager, event bus, and stores; tests substitute a recorder.
#[async_trait]
pub trait ActionEffects: Send + Sync {
    async fn inject(&self, session_id: &str, bytes: Bytes) -> Result<()>;
    fn notify(&self, notice: MonitorNotice);
    async fn complete_current_task(&self, container_id: &str) -> Result<()>;
    async fn log(&self, entry: DispatchLog);
}

struct TimerState {
    last_output: Instant,
    armed: bool,
    in_flight: bool,
    pending_reset: bool,
}

pub struct MonitorSession {
    pub container_id: String,
    pub session_id: String,
    pub docker_id: String,
    threshold: Duration,
    strategy: Box<dyn Strategy>,
    ring: Mutex<ContextRing>,
    state: Mutex<TimerState>,
    notify: Notify,
    enabled: AtomicBool,
    cancel: CancellationToken,
    effects: Arc<dyn ActionEffects>,
}

impl MonitorSession {
    /// Create the session and spawn its timer task. The session starts
    /// enabled and armed.
    pub fn spawn(
        container_id: String,
        session_id: String,
        docker_id: String,
        threshold: Duration,
        buffer_bytes: usize,
        strategy: Box<dyn Strategy>,
        effects: Arc<dyn ActionEffects>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            container_id,
            session_id,
            docker_id,
            threshold,
            strategy,
            ring: Mutex::new(ContextRing::new(buffer_bytes)),
            state: Mutex::new(TimerState {
                last_output: Instant::now(),
                armed: true,
                in_flight: false,
                pending_reset: false,
            }),
            notify: Notify::new(),
            enabled: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            effects,
        });

        let timer = session.clone();
        tokio::spawn(async move {
            timer.run_timer().await;
        });

        session
    }

    /// Feed PTY output into the session. Called synchronously from the PTY
    /// fan-out.
    pub fn on_output(&self, bytes: &[u8]) {
        self.ring.lock().push(bytes);

        let mut state = self.state.lock();
        if state.in_flight {
            // Buffered only; the reset applies when decide() returns.
            state.pending_reset = true;
        } else {
            state.last_output = Instant::now();
            state.armed = self.enabled.load(Ordering::SeqCst);
        }
        drop(state);
        self.notify.notify_one();
    }

    /// Enable: reset the silence clock and arm the timer.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.last_output = Instant::now();
        state.armed = true;
        drop(state);
        self.notify.notify_one();
    }

    /// Disable: disarm without terminating the task.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.state.lock().armed = false;
        self.notify.notify_one();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Terminate: cancel the timer task and any in-flight dispatch.
    pub fn terminate(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn run_timer(self: Arc<Self>) {
        loop {
            let deadline = {
                let state = self.state.lock();
                if state.armed && !state.in_flight {
                    Some(state.last_output + self.threshold)
                } else {
                    None
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.notify.notified() => continue,
                _ = sleep_until_or_forever(deadline) => {
                    self.dispatch().await;
                }
            }
        }
        debug!("Monitor timer for session {} terminated", self.session_id);
    }

    /// Fire the strategy once. Single-flight: runs inside the timer task.
    async fn dispatch(self: &Arc<Self>) {
        let (snippet, silence) = {
            let mut state = self.state.lock();
            let silence = state.last_output.elapsed();
            // Output may have raced the expiring timer; only a full silence
            // window dispatches.
            if !state.armed || silence < self.threshold {
                return;
            }
            state.in_flight = true;
            state.armed = false;
            (self.ring.lock().snapshot(), silence)
        };

        let ctx = SilenceContext {
            container_id: self.container_id.clone(),
            session_id: self.session_id.clone(),
            docker_id: self.docker_id.clone(),
            silence,
            snippet: snippet.clone(),
        };

        let decision = tokio::select! {
            _ = self.cancel.cancelled() => {
                self.finish_dispatch(None);
                return;
            }
            decision = self.strategy.decide(&ctx) => decision,
        };

        let strategy_name = self.strategy.kind().to_string();
        let mut log = DispatchLog {
            container_id: self.container_id.clone(),
            session_id: self.session_id.clone(),
            strategy: strategy_name,
            action: String::new(),
            command: None,
            context_snippet: Some(snippet),
            ai_response: None,
            success: false,
            error: None,
        };

        let action = match decision {
            Ok(decision) => {
                log.action = decision.action.name().to_string();
                log.ai_response = decision.ai_response;
                log.success = decision.success;
                log.error = decision.error;
                Some(decision.action)
            }
            Err(e) => {
                warn!(
                    "Strategy dispatch failed for session {}: {}",
                    self.session_id, e
                );
                log.action = "error".to_string();
                log.error = Some(e.to_string());
                None
            }
        };

        if let Some(action) = &action {
            self.apply(action, &mut log).await;
        }

        self.effects.log(log).await;
        self.finish_dispatch(action);
    }

    async fn apply(&self, action: &Action, log: &mut DispatchLog) {
        match action {
            Action::Inject(command) => {
                log.command = Some(command.clone());
                if let Err(e) = self
                    .effects
                    .inject(&self.session_id, Bytes::from(command.clone().into_bytes()))
                    .await
                {
                    warn!(
                        "Injection into session {} failed: {}",
                        self.session_id, e
                    );
                    log.success = false;
                    log.error = Some(e.to_string());
                }
            }
            Action::Notify(message) => {
                self.effects.notify(MonitorNotice {
                    container_id: self.container_id.clone(),
                    session_id: self.session_id.clone(),
                    message: message.clone(),
                });
            }
            Action::Complete => {
                if let Err(e) = self.effects.complete_current_task(&self.container_id).await {
                    warn!(
                        "Completing current task for container {} failed: {}",
                        self.container_id, e
                    );
                    log.success = false;
                    log.error = Some(e.to_string());
                }
            }
            Action::Skip => {}
        }
    }

    /// Apply post-dispatch arming rules.
    fn finish_dispatch(&self, action: Option<Action>) {
        let mut state = self.state.lock();
        state.in_flight = false;

        let enabled = self.enabled.load(Ordering::SeqCst);
        if state.pending_reset {
            // Output arrived mid-dispatch; its reset applies now.
            state.pending_reset = false;
            state.last_output = Instant::now();
            state.armed = enabled;
        } else if action.as_ref().map(|a| a.rearms_immediately()).unwrap_or(true) {
            // Skip/notify (and dispatch errors) re-arm for the next window.
            state.last_output = Instant::now();
            state.armed = enabled;
        } else {
            // Inject/complete stay dormant until the next output.
            state.armed = false;
        }
        drop(state);
        self.notify.notify_one();
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::strategy::{Decision, StrategyKind};
    use std::sync::Mutex as StdMutex;

    /// Records effects instead of performing them.
    struct Recorder {
        injected: StdMutex<Vec<String>>,
        notices: StdMutex<Vec<String>>,
        logs: StdMutex<Vec<DispatchLog>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                injected: StdMutex::new(Vec::new()),
                notices: StdMutex::new(Vec::new()),
                logs: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ActionEffects for Recorder {
        async fn inject(&self, _session_id: &str, bytes: Bytes) -> Result<()> {
            self.injected
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&bytes).into_owned());
            Ok(())
        }

        fn notify(&self, notice: MonitorNotice) {
            self.notices.lock().unwrap().push(notice.message);
        }

        async fn complete_current_task(&self, _container_id: &str) -> Result<()> {
            Ok(())
        }

        async fn log(&self, entry: DispatchLog) {
            self.logs.lock().unwrap().push(entry);
        }
    }

    /// Strategy returning a fixed action, counting invocations.
    struct FixedStrategy {
        action: Action,
        calls: Arc<StdMutex<u32>>,
    }

    #[async_trait]
    impl Strategy for FixedStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Injection
        }

        fn validate(&self) -> Result<()> {
            Ok(())
        }

        async fn decide(&self, _ctx: &SilenceContext) -> Result<Decision> {
            *self.calls.lock().unwrap() += 1;
            Ok(Decision::ok(self.action.clone()))
        }
    }

    fn spawn_session(
        action: Action,
        effects: Arc<Recorder>,
        threshold: Duration,
    ) -> (Arc<MonitorSession>, Arc<StdMutex<u32>>) {
        let calls = Arc::new(StdMutex::new(0));
        let strategy = Box::new(FixedStrategy {
            action,
            calls: calls.clone(),
        });
        let session = MonitorSession::spawn(
            "c1".into(),
            "s1".into(),
            "d1".into(),
            threshold,
            1024,
            strategy,
            effects,
        );
        (session, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_threshold() {
        let effects = Recorder::new();
        let (_session, calls) = spawn_session(
            Action::Inject("echo hi\n".into()),
            effects.clone(),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(effects.injected.lock().unwrap().as_slice(), ["echo hi\n"]);

        // Inject stays dormant: no second fire without new output
        tokio::time::sleep(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_resets_timer() {
        let effects = Recorder::new();
        let (session, calls) = spawn_session(
            Action::Inject("x\n".into()),
            effects,
            Duration::from_secs(10),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        session.on_output(b"progress...");
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        // 12s wall time but never 10s of continuous silence
        assert_eq!(*calls.lock().unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_rearms_immediately() {
        let effects = Recorder::new();
        let (_session, calls) =
            spawn_session(Action::Skip, effects, Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        tokio::task::yield_now().await;

        // Re-armed after every skip: roughly one fire per threshold window
        assert!(*calls.lock().unwrap() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_output_follows_inject() {
        let effects = Recorder::new();
        let (session, calls) = spawn_session(
            Action::Inject("run\n".into()),
            effects,
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock().unwrap(), 1);

        // New output re-arms; next silence fires again
        session.on_output(b"command output");
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_cancels_firing() {
        let effects = Recorder::new();
        let (session, calls) =
            spawn_session(Action::Skip, effects, Duration::from_secs(5));

        session.disable();
        tokio::time::sleep(Duration::from_secs(30)).await;
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock().unwrap(), 0);

        session.enable();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert!(*calls.lock().unwrap() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_effect_and_log() {
        let effects = Recorder::new();
        let (_session, _calls) = spawn_session(
            Action::Notify("queue_empty".into()),
            effects.clone(),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            effects.notices.lock().unwrap().first().map(String::as_str),
            Some("queue_empty")
        );
        let logs = effects.logs.lock().unwrap();
        assert!(!logs.is_empty());
        assert_eq!(logs[0].action, "notify");
        assert!(logs[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ring_receives_output() {
        let effects = Recorder::new();
        let (session, _calls) = spawn_session(
            Action::Inject("x\n".into()),
            effects.clone(),
            Duration::from_secs(5),
        );

        session.on_output(b"$ make test\n");
        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let logs = effects.logs.lock().unwrap();
        assert!(logs[0]
            .context_snippet
            .as_deref()
            .unwrap()
            .contains("make test"));
    }
}
