//! Engine event stream listener
//!
//! Subscribes to container lifecycle events for managed containers and
//! forwards them on a channel. On stream failure it resubscribes after a
//! backoff and emits a `Resync` so the reconciler absorbs anything missed
//! during the gap.

use std::collections::HashMap;
use std::time::Duration;

use bollard::system::EventsOptions;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{DockerService, MANAGED_LABEL};

/// Lifecycle event forwarded to the daemon core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Container started
    Started { docker_id: String },
    /// Container stopped or exited
    Stopped { docker_id: String },
    /// Container process died
    Died { docker_id: String },
    /// Container removed from the engine
    Destroyed { docker_id: String },
    /// The stream was interrupted; a full reconcile should run
    Resync,
}

/// Spawn the listener task. Events arrive on the returned receiver until the
/// token is cancelled.
pub fn spawn_event_listener(
    docker: DockerService,
    cancel: CancellationToken,
) -> mpsc::Receiver<EngineEvent> {
    let (tx, rx) = mpsc::channel(256);

    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            filters.insert(
                "label".to_string(),
                vec![format!("{}=true", MANAGED_LABEL)],
            );

            let options = EventsOptions::<String> {
                filters,
                ..Default::default()
            };

            let mut stream = docker.client().events(Some(options));
            debug!("Engine event stream subscribed");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = stream.next() => {
                        match event {
                            Some(Ok(message)) => {
                                let Some(actor) = message.actor else { continue };
                                let Some(docker_id) = actor.id else { continue };
                                let action = message.action.unwrap_or_default();

                                let event = match action.as_str() {
                                    "start" => EngineEvent::Started { docker_id },
                                    "stop" => EngineEvent::Stopped { docker_id },
                                    "die" => EngineEvent::Died { docker_id },
                                    "destroy" => EngineEvent::Destroyed { docker_id },
                                    _ => continue,
                                };

                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("Engine event stream error: {}", e);
                                break;
                            }
                            None => {
                                warn!("Engine event stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            // Stream dropped; back off, then resubscribe with a catch-up.
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
            }
            if tx.send(EngineEvent::Resync).await.is_err() {
                return;
            }
        }
    });

    rx
}
