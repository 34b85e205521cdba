//! Drive a webview window that lives in its own process.
//!
//! [`WebViewProcess`] spawns a `webproc_worker` binary, hands it one half of
//! a duplex ipc channel plus the [`WindowConfig`], and then turns every
//! window operation into a blocking request/response round trip.
//!
//! ```no_run
//! use webproc::{WebViewProcess, WindowConfig};
//!
//! let title = WebViewProcess::scope(
//!     WindowConfig::new("Demo", "https://example.com"),
//!     |window| {
//!         window.resize(1024, 768)?;
//!         window.evaluate_script("document.title")
//!     },
//! )?;
//! println!("{title}");
//! # Ok::<(), webproc::Error>(())
//! ```

mod error;
mod process;
pub mod supervisor;

pub use error::{Error, Result};
pub use process::{Picked, WebViewProcess, HANDSHAKE_ATTEMPTS};
pub use supervisor::{resolve_worker_path, WorkerProcess, WORKER_PATH_ENV};
pub use webproc_common::{
    ChannelError, FileContents, HeadlessScript, ScriptOutcome, ToolkitKind, WindowConfig,
};
