// Supervisor Module
//
// Child process lifecycle: integrity check, spawn, output capture and
// guaranteed termination.

pub mod integrity;
pub mod process;
pub mod stream;

pub use integrity::{BinaryVerifier, ChecksumVerifier, PresenceVerifier};
pub use process::{
    describe_exit, ProcessHandle, ProcessSupervisor, ShutdownReport, SpawnedProcess,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use stream::{spawn_line_reader, StreamEvent, StreamKind};
