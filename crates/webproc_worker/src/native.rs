//! Real window: a winit event loop hosting a wry webview, with rfd dialogs.
//!
//! winit only lets the event-loop thread touch the window, so every
//! [`WindowHandle`] call from the poller is sent through an
//! [`EventLoopProxy`] as a boxed job and its result comes back over a std
//! channel.

use crate::toolkit::{OpenDialog, Toolkit, WindowHandle};
use anyhow::{anyhow, Context};
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{debug, warn};
use webproc_common::WindowConfig;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy};
use winit::window::{Fullscreen, Icon, Window, WindowId};
use wry::{Rect, WebView, WebViewBuilder};

type Job = Box<dyn FnOnce(&ActiveEventLoop, &mut Live) + Send>;

enum WindowMessage {
    Run(Job),
    Destroy(mpsc::Sender<anyhow::Result<()>>),
}

/// The window while it exists. The webview is declared first so it drops
/// before its parent window.
struct Live {
    webview: WebView,
    window: Window,
}

pub struct NativeToolkit {
    event_loop: Option<EventLoop<WindowMessage>>,
    config: Option<WindowConfig>,
}

impl NativeToolkit {
    pub fn new() -> Self {
        Self {
            event_loop: None,
            config: None,
        }
    }
}

impl Default for NativeToolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit for NativeToolkit {
    type Handle = NativeWindow;

    fn create(&mut self, config: &WindowConfig) -> anyhow::Result<NativeWindow> {
        #[cfg(target_os = "linux")]
        gtk::init().context("failed to initialize gtk")?;

        let mut event_loop_builder = EventLoop::<WindowMessage>::with_user_event();
        let event_loop = event_loop_builder
            .build()
            .context("failed to create event loop")?;
        let proxy = event_loop.create_proxy();

        // Decode the icon now so a bad path fails startup instead of the window.
        if let Some(path) = &config.icon {
            load_icon(path)?;
        }

        self.event_loop = Some(event_loop);
        self.config = Some(config.clone());
        Ok(NativeWindow { proxy })
    }

    fn run_event_loop(self) -> anyhow::Result<()> {
        let (Some(event_loop), Some(config)) = (self.event_loop, self.config) else {
            return Err(anyhow!("event loop started before a window was created"));
        };

        let mut application = Application {
            config,
            live: None,
            pending: Vec::new(),
            closing: false,
            failure: None,
        };
        event_loop.run_app(&mut application)?;

        match application.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct Application {
    config: WindowConfig,
    live: Option<Live>,
    /// Messages that arrived before the window was created.
    pending: Vec<WindowMessage>,
    closing: bool,
    failure: Option<anyhow::Error>,
}

impl Application {
    fn handle_message(&mut self, event_loop: &ActiveEventLoop, message: WindowMessage) {
        match message {
            WindowMessage::Destroy(reply) => {
                self.close(event_loop);
                let _ = reply.send(Ok(()));
            }
            WindowMessage::Run(job) => match self.live.as_mut() {
                Some(live) => job(event_loop, live),
                None if self.closing => {
                    // Dropping the job drops its reply sender; the caller sees the window gone.
                    debug!("dropping window job after close");
                }
                None => self.pending.push(WindowMessage::Run(job)),
            },
        }
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.closing = true;
        self.live = None;
        self.pending.clear();
        event_loop.exit();
    }
}

impl ApplicationHandler<WindowMessage> for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.live.is_some() || self.closing {
            return;
        }

        match open_window(event_loop, &self.config) {
            Ok(live) => {
                debug!(title = %self.config.title, url = %self.config.url, "window created");
                self.live = Some(live);
                for message in mem::take(&mut self.pending) {
                    self.handle_message(event_loop, message);
                }
            }
            Err(e) => {
                self.failure = Some(e);
                self.close(event_loop);
            }
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, message: WindowMessage) {
        self.handle_message(event_loop, message);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::Resized(size) => {
                if let Some(live) = &self.live {
                    let bounds = Rect {
                        position: wry::dpi::LogicalPosition::new(0, 0).into(),
                        size: wry::dpi::PhysicalSize::new(size.width, size.height).into(),
                    };
                    if let Err(e) = live.webview.set_bounds(bounds) {
                        warn!("failed to resize webview: {e}");
                    }
                }
            }
            WindowEvent::CloseRequested => {
                debug!("window closed by user");
                self.close(event_loop);
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // webkit2gtk needs its own main loop pumped alongside winit's.
        #[cfg(target_os = "linux")]
        {
            while gtk::events_pending() {
                gtk::main_iteration_do(false);
            }
            event_loop.set_control_flow(winit::event_loop::ControlFlow::WaitUntil(
                std::time::Instant::now() + std::time::Duration::from_millis(16),
            ));
        }
        #[cfg(not(target_os = "linux"))]
        let _ = event_loop;
    }
}

fn open_window(event_loop: &ActiveEventLoop, config: &WindowConfig) -> anyhow::Result<Live> {
    let mut attributes = Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(LogicalSize::new(config.width, config.height))
        .with_maximized(config.maximized);
    if config.fullscreen {
        attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
    }
    if let Some(path) = &config.icon {
        attributes = attributes.with_window_icon(Some(load_icon(path)?));
    }

    let window = event_loop
        .create_window(attributes)
        .context("failed to create window")?;
    let webview = WebViewBuilder::new()
        .with_url(config.url.as_str())
        .with_devtools(config.debug)
        .build(&window)
        .context("failed to create webview")?;

    Ok(Live { webview, window })
}

fn load_icon(path: &Path) -> anyhow::Result<Icon> {
    let image = image::open(path)
        .with_context(|| format!("failed to load icon {}", path.display()))?
        .into_rgba8();
    let (width, height) = image.dimensions();
    Icon::from_rgba(image.into_raw(), width, height)
        .with_context(|| format!("invalid icon {}", path.display()))
}

/// Poller-side handle. Cheap to clone; every call round-trips through the event loop.
#[derive(Clone)]
pub struct NativeWindow {
    proxy: EventLoopProxy<WindowMessage>,
}

impl NativeWindow {
    fn invoke<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ActiveEventLoop, &mut Live) -> anyhow::Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |event_loop, live| {
            let _ = reply_tx.send(f(event_loop, live));
        });

        self.proxy
            .send_event(WindowMessage::Run(job))
            .map_err(|_| anyhow!("event loop has exited"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("window closed before the command ran"))?
    }
}

impl WindowHandle for NativeWindow {
    fn resize(&self, width: u32, height: u32) -> anyhow::Result<()> {
        self.invoke(move |_, live| {
            let _ = live
                .window
                .request_inner_size(LogicalSize::new(width, height));
            Ok(())
        })
    }

    fn set_title(&self, title: &str) -> anyhow::Result<()> {
        let title = title.to_string();
        self.invoke(move |_, live| {
            live.window.set_title(&title);
            Ok(())
        })
    }

    fn toggle_fullscreen(&self) -> anyhow::Result<()> {
        self.invoke(|_, live| {
            let next = match live.window.fullscreen() {
                Some(_) => None,
                None => Some(Fullscreen::Borderless(None)),
            };
            live.window.set_fullscreen(next);
            Ok(())
        })
    }

    fn maximize(&self) -> anyhow::Result<()> {
        self.invoke(|_, live| {
            live.window.set_maximized(true);
            Ok(())
        })
    }

    fn restore(&self) -> anyhow::Result<()> {
        self.invoke(|_, live| {
            live.window.set_minimized(false);
            live.window.set_maximized(false);
            Ok(())
        })
    }

    fn destroy(&self) -> anyhow::Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.proxy
            .send_event(WindowMessage::Destroy(reply_tx))
            .map_err(|_| anyhow!("event loop has exited"))?;
        reply_rx
            .recv()
            .map_err(|_| anyhow!("event loop exited before the window was destroyed"))?
    }

    fn evaluate_script(&self, code: &str) -> anyhow::Result<String> {
        // The result arrives later, from the webview's callback.
        let (result_tx, result_rx) = mpsc::channel::<String>();
        let code = code.to_string();
        self.invoke(move |_, live| {
            live.webview
                .evaluate_script_with_callback(&code, move |json| {
                    let _ = result_tx.send(json);
                })
                .context("failed to evaluate script")
        })?;

        let json = result_rx
            .recv()
            .map_err(|_| anyhow!("window closed before the script returned"))?;
        Ok(if json.is_empty() { "null".to_string() } else { json })
    }

    fn prompt_open(&self, dialog: OpenDialog) -> anyhow::Result<Vec<PathBuf>> {
        self.invoke(move |_, live| {
            let mut picker = rfd::FileDialog::new().set_parent(&live.window);
            let picked: Vec<PathBuf> = match dialog {
                OpenDialog::Folder => picker.pick_folder().into_iter().collect(),
                OpenDialog::Files { multiple, filters } => {
                    for filter in &filters {
                        picker = picker.add_filter(filter.label.as_str(), &filter.extensions);
                    }
                    if multiple {
                        picker.pick_files().unwrap_or_default()
                    } else {
                        picker.pick_file().into_iter().collect()
                    }
                }
            };
            Ok(picked)
        })
    }

    fn prompt_save(
        &self,
        file_name: &str,
        directory: Option<&Path>,
    ) -> anyhow::Result<Option<PathBuf>> {
        let file_name = file_name.to_string();
        let directory = directory.map(Path::to_path_buf);
        self.invoke(move |_, live| {
            let mut picker = rfd::FileDialog::new()
                .set_parent(&live.window)
                .set_file_name(file_name);
            if let Some(directory) = directory {
                picker = picker.set_directory(directory);
            }
            Ok(picker.save_file())
        })
    }
}
