//! A toolkit with no window system behind it.
//!
//! Window state lives in memory, dialogs and scripts are answered from a
//! [`HeadlessScript`], and the "event loop" parks the main thread until the
//! window is destroyed.

use crate::toolkit::{OpenDialog, Toolkit, WindowHandle};
use anyhow::{anyhow, bail};
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use webproc_common::{HeadlessScript, ScriptOutcome, WindowConfig};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    pub title: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub maximized: bool,
    pub destroyed: bool,
    pub last_open: Option<OpenDialog>,
    pub last_save: Option<(String, Option<PathBuf>)>,
}

struct Shared {
    state: Mutex<WindowState>,
    closed: Condvar,
}

pub struct HeadlessToolkit {
    script: Arc<HeadlessScript>,
    shared: Option<Arc<Shared>>,
}

impl HeadlessToolkit {
    pub fn new(script: HeadlessScript) -> Self {
        Self {
            script: Arc::new(script),
            shared: None,
        }
    }
}

impl Toolkit for HeadlessToolkit {
    type Handle = HeadlessWindow;

    fn create(&mut self, config: &WindowConfig) -> anyhow::Result<HeadlessWindow> {
        if let Some(message) = &self.script.fail_startup {
            bail!("{message}");
        }
        if self.shared.is_some() {
            bail!("headless toolkit already has a window");
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(WindowState {
                title: config.title.clone(),
                url: config.url.clone(),
                width: config.width,
                height: config.height,
                fullscreen: config.fullscreen,
                maximized: config.maximized,
                ..WindowState::default()
            }),
            closed: Condvar::new(),
        });
        self.shared = Some(Arc::clone(&shared));

        Ok(HeadlessWindow {
            shared,
            script: Arc::clone(&self.script),
        })
    }

    fn run_event_loop(self) -> anyhow::Result<()> {
        let shared = self
            .shared
            .ok_or_else(|| anyhow!("event loop started before a window was created"))?;

        let mut state = shared.state.lock();
        while !state.destroyed {
            shared.closed.wait(&mut state);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct HeadlessWindow {
    shared: Arc<Shared>,
    script: Arc<HeadlessScript>,
}

impl HeadlessWindow {
    pub fn snapshot(&self) -> WindowState {
        self.shared.state.lock().clone()
    }

    fn with_live<T>(&self, f: impl FnOnce(&mut WindowState) -> T) -> anyhow::Result<T> {
        let mut state = self.shared.state.lock();
        if state.destroyed {
            bail!("window has been destroyed");
        }
        Ok(f(&mut state))
    }
}

impl WindowHandle for HeadlessWindow {
    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()> {
        self.with_live(|state| {
            state.width = width;
            state.height = height;
        })
    }

    fn set_title(&self, title: &str) -> anyhow::Result<()> {
        self.with_live(|state| state.title = title.to_string())
    }

    fn toggle_fullscreen(&self) -> anyhow::Result<()> {
        self.with_live(|state| state.fullscreen = !state.fullscreen)
    }

    fn maximize(&self) -> anyhow::Result<()> {
        self.with_live(|state| state.maximized = true)
    }

    fn restore(&self) -> anyhow::Result<()> {
        self.with_live(|state| state.maximized = false)
    }

    fn destroy(&self) -> anyhow::Result<()> {
        self.with_live(|state| state.destroyed = true)?;
        self.shared.closed.notify_all();
        Ok(())
    }

    fn evaluate_script(&self, code: &str) -> anyhow::Result<String> {
        let state = self.with_live(|state| state.clone())?;

        if let Some((_, outcome)) = self.script.scripts.iter().find(|(src, _)| src == code) {
            return match outcome {
                ScriptOutcome::Value(json) => Ok(json.clone()),
                ScriptOutcome::Error(message) => Err(anyhow!("{message}")),
            };
        }

        let value = match code.trim() {
            "document.title" => serde_json::Value::from(state.title),
            "window.location.href" => serde_json::Value::from(state.url),
            "window.innerWidth" => serde_json::Value::from(state.width),
            "window.innerHeight" => serde_json::Value::from(state.height),
            "document.fullscreenElement !== null" => serde_json::Value::from(state.fullscreen),
            _ => bail!("headless toolkit cannot evaluate: {code}"),
        };
        Ok(value.to_string())
    }

    fn prompt_open(&self, dialog: OpenDialog) -> anyhow::Result<Vec<PathBuf>> {
        let single = !matches!(dialog, OpenDialog::Files { multiple: true, .. });
        self.with_live(|state| state.last_open = Some(dialog))?;

        let mut paths = self.script.open_dialog.clone();
        if single {
            paths.truncate(1);
        }
        Ok(paths)
    }

    fn prompt_save(
        &self,
        file_name: &str,
        directory: Option<&Path>,
    ) -> anyhow::Result<Option<PathBuf>> {
        self.with_live(|state| {
            state.last_save = Some((file_name.to_string(), directory.map(Path::to_path_buf)))
        })?;
        Ok(self.script.save_dialog.clone())
    }
}
