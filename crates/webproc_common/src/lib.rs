//! Types shared by the controller (`webproc`) and the worker process (`webproc_worker`).

pub mod channel;
pub mod config;
pub mod message;

pub use channel::{ChannelError, ControllerEndpoint, Endpoint, WorkerBootstrap, WorkerEndpoint};
pub use config::{HeadlessScript, ScriptOutcome, ToolkitKind, WindowConfig};
pub use message::{
    file_filters, Command, FileContents, FileFilter, Payload, Request, RequestId, Response,
    WorkerMessage, SENTINEL_REQUEST_ID,
};

/// Argument that selects the ipc-channel bootstrap when spawning a worker.
pub const WORKER_METHOD: &str = "ipc_channel";
