// Process module - PT launch, supervision and termination

pub mod adapter;
pub mod handshake;
pub mod managed;
pub mod spawner;
pub mod supervisor;
mod types;

pub use adapter::{SupervisedProcess, TransportAdapter};
pub use managed::{AdapterConfig, ManagedProcess, ManagedTransportAdapter};
pub use spawner::{spawn_pt, SpawnedProcess};
pub use supervisor::LifecycleSupervisor;
pub use types::{FailedTransport, LiveTransport, RunOutcome, SupervisorState};
