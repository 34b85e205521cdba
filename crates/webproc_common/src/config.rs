use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_WIDTH: u32 = 800;
pub const DEFAULT_HEIGHT: u32 = 600;

/// Everything the worker needs to bring its window up. Shipped to the worker
/// through the bootstrap handoff, never through the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub title: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub maximized: bool,
    pub fullscreen: bool,
    pub icon: Option<PathBuf>,
    /// Enables devtools in the native webview.
    pub debug: bool,
    pub toolkit: ToolkitKind,
}

impl WindowConfig {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            maximized: false,
            fullscreen: false,
            icon: None,
            debug: false,
            toolkit: ToolkitKind::Native,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn maximized(mut self, maximized: bool) -> Self {
        self.maximized = maximized;
        self
    }

    pub fn fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    pub fn icon(mut self, icon: impl Into<PathBuf>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn headless(mut self, script: HeadlessScript) -> Self {
        self.toolkit = ToolkitKind::Headless(script);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolkitKind {
    /// A real window. Only available when the worker is built with `native`.
    Native,
    /// In-memory window driven by canned dialog and script answers.
    Headless(HeadlessScript),
}

/// Canned answers for the headless toolkit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadlessScript {
    /// Selection returned by every open dialog. Empty means cancelled.
    pub open_dialog: Vec<PathBuf>,
    /// Destination returned by every save dialog. `None` means cancelled.
    pub save_dialog: Option<PathBuf>,
    /// Script source → outcome, looked up by exact match.
    pub scripts: Vec<(String, ScriptOutcome)>,
    /// Makes window creation fail with this message.
    pub fail_startup: Option<String>,
}

impl HeadlessScript {
    pub fn open_dialog<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.open_dialog = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn save_dialog(mut self, destination: impl Into<PathBuf>) -> Self {
        self.save_dialog = Some(destination.into());
        self
    }

    pub fn script(mut self, code: impl Into<String>, outcome: ScriptOutcome) -> Self {
        self.scripts.push((code.into(), outcome));
        self
    }

    pub fn fail_startup(mut self, message: impl Into<String>) -> Self {
        self.fail_startup = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptOutcome {
    /// JSON text of the value the script evaluates to.
    Value(String),
    Error(String),
}
