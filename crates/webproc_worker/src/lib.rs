//! Worker side of webproc: owns the window and its event loop, and serves
//! commands from the controller on a poller thread.

pub mod headless;
#[cfg(feature = "native")]
pub mod native;
pub mod runtime;
pub mod toolkit;

use anyhow::anyhow;
use ipc_channel::ipc::{self, IpcSender};
use tracing::debug;
use webproc_common::{ToolkitKind, WindowConfig, WorkerBootstrap, WorkerEndpoint};

pub use headless::{HeadlessToolkit, HeadlessWindow};
pub use runtime::{dispatch, run_worker, Poller};
pub use toolkit::{OpenDialog, Toolkit, WindowHandle};

/// Connects to the controller's one-shot server and waits for the bootstrap.
pub fn connect(server_name: &str) -> anyhow::Result<WorkerBootstrap> {
    let bootstrap_server = IpcSender::<IpcSender<WorkerBootstrap>>::connect(server_name.to_string())
        .map_err(|e| anyhow!("failed to connect to controller: {e}"))?;
    let (bootstrap_tx, bootstrap_rx) = ipc::channel::<WorkerBootstrap>()
        .map_err(|e| anyhow!("failed to create bootstrap channel: {e}"))?;

    bootstrap_server
        .send(bootstrap_tx)
        .map_err(|e| anyhow!("failed to hand bootstrap channel to controller: {e:?}"))?;
    bootstrap_rx
        .recv()
        .map_err(|e| anyhow!("controller never sent the bootstrap: {e:?}"))
}

/// Runs the window described by `config` with the toolkit it names.
pub fn run(endpoint: WorkerEndpoint, config: WindowConfig) -> anyhow::Result<()> {
    match &config.toolkit {
        ToolkitKind::Headless(script) => {
            debug!("using headless toolkit");
            run_worker(HeadlessToolkit::new(script.clone()), endpoint, &config)
        }
        #[cfg(feature = "native")]
        ToolkitKind::Native => {
            debug!("using native toolkit");
            run_worker(native::NativeToolkit::new(), endpoint, &config)
        }
        #[cfg(not(feature = "native"))]
        ToolkitKind::Native => {
            let e = anyhow!("worker was built without the `native` feature");
            tracing::error!("{e}");
            let _ = endpoint.send(webproc_common::Response::sentinel(e.to_string()));
            Err(e)
        }
    }
}
