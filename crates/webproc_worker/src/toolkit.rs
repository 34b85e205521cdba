use std::path::{Path, PathBuf};
use webproc_common::{FileFilter, WindowConfig};

/// What an open dialog should let the user pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenDialog {
    Files {
        multiple: bool,
        filters: Vec<FileFilter>,
    },
    Folder,
}

/// A window toolkit: creates the one window of this process and owns the
/// event loop that keeps it alive.
pub trait Toolkit {
    type Handle: WindowHandle + Send + 'static;

    /// Creates the window with its initial size, flags and icon. Must not
    /// block on the event loop, which is not running yet.
    fn create(&mut self, config: &WindowConfig) -> anyhow::Result<Self::Handle>;

    /// Blocks the calling (main) thread until the window goes away.
    fn run_event_loop(self) -> anyhow::Result<()>;
}

/// Operations on the live window. Called from the poller thread.
pub trait WindowHandle {
    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()>;
    fn set_title(&self, title: &str) -> anyhow::Result<()>;
    fn toggle_fullscreen(&self) -> anyhow::Result<()>;
    fn maximize(&self) -> anyhow::Result<()>;
    fn restore(&self) -> anyhow::Result<()>;

    /// Tears the window down; the event loop is expected to return afterwards.
    fn destroy(&self) -> anyhow::Result<()>;

    /// Returns the script's value as JSON text.
    fn evaluate_script(&self, code: &str) -> anyhow::Result<String>;

    /// Selected paths; empty when the dialog was cancelled.
    fn prompt_open(&self, dialog: OpenDialog) -> anyhow::Result<Vec<PathBuf>>;

    fn prompt_save(
        &self,
        file_name: &str,
        directory: Option<&Path>,
    ) -> anyhow::Result<Option<PathBuf>>;
}
