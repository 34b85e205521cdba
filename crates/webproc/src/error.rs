use webproc_common::ChannelError;

/// The one error type every [`crate::WebViewProcess`] call can return.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("webview process is not running")]
    NotRunning,

    #[error("webview process is already running")]
    AlreadyRunning,

    #[error("webview initialization failed: {0}")]
    Startup(String),

    /// The worker reported a failure of its own after startup, such as its
    /// event loop dying. The window is gone.
    #[error("webview process failed: {0}")]
    Worker(String),

    /// A command failed inside the worker; the message is the worker's.
    #[error("{0}")]
    Command(String),

    #[error("lost connection to webview process: {0}")]
    Channel(#[from] ChannelError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("worker executable not found; set WEBPROC_WORKER_PATH")]
    WorkerNotFound,

    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for worker: {0}")]
    Wait(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
