//! Container engine integration

mod events;
mod service;

pub use events::{spawn_event_listener, EngineEvent};
pub use service::{ContainerStats, DockerService, EngineContainerSpec, ExecOutput, TtyExec};

/// Label identifying containers this daemon manages.
pub const MANAGED_LABEL: &str = "drydock.managed";
/// Label carrying the owning container record id.
pub const CONTAINER_ID_LABEL: &str = "drydock.container-id";
