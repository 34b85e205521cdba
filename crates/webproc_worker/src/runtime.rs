use crate::toolkit::{OpenDialog, Toolkit, WindowHandle};
use anyhow::Context;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};
use webproc_common::{
    file_filters, ChannelError, Command, FileContents, Payload, Request, Response, WindowConfig,
    WorkerEndpoint, WorkerMessage,
};

/// How long the poller waits on the channel before checking its stop flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one command against the window. Never panics outward: toolkit
/// errors and panics both end up in the response.
pub fn dispatch<H: WindowHandle>(handle: &H, request: Request) -> Response {
    let Request { id, command } = request;
    let name = command.name();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(handle, command)))
        .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic))));

    match outcome {
        Ok(payload) => Response::ok(id, payload),
        Err(e) => {
            warn!(request_id = id, command = name, "command failed: {e:#}");
            Response::error(id, format!("{e:#}"))
        }
    }
}

fn execute<H: WindowHandle>(handle: &H, command: Command) -> anyhow::Result<Payload> {
    match command {
        Command::Ping => Ok(Payload::Ack),
        Command::Close => {
            handle.destroy()?;
            Ok(Payload::Ack)
        }
        Command::Resize { width, height } => {
            handle.resize(width, height)?;
            Ok(Payload::Ack)
        }
        Command::SetTitle { title } => {
            handle.set_title(&title)?;
            Ok(Payload::Ack)
        }
        Command::ToggleFullscreen => {
            handle.toggle_fullscreen()?;
            Ok(Payload::Ack)
        }
        Command::SetMaximized { maximized } => {
            if maximized {
                handle.maximize()?;
            } else {
                handle.restore()?;
            }
            Ok(Payload::Ack)
        }
        Command::PickFile {
            extensions,
            multiple,
        } => {
            let paths = handle.prompt_open(OpenDialog::Files {
                multiple,
                filters: file_filters(&extensions),
            })?;
            Ok(Payload::Paths(paths))
        }
        Command::PickFolder => Ok(Payload::Paths(handle.prompt_open(OpenDialog::Folder)?)),
        Command::SaveFile {
            contents,
            file_name,
            directory,
        } => {
            let Some(destination) = handle.prompt_save(&file_name, directory.as_deref())? else {
                return Ok(Payload::Saved(false));
            };
            write_contents(&destination, &contents)?;
            Ok(Payload::Saved(true))
        }
        Command::EvaluateScript { code } => Ok(Payload::Script(handle.evaluate_script(&code)?)),
    }
}

/// Writes exactly the bytes the controller supplied. Text goes out as UTF-8.
pub fn write_contents(destination: &Path, contents: &FileContents) -> anyhow::Result<()> {
    match contents {
        FileContents::Text(text) => fs::write(destination, text.as_bytes()),
        FileContents::Bytes(bytes) => fs::write(destination, bytes),
        FileContents::File(source) => {
            // Read first so a bad source leaves the destination untouched.
            let bytes = fs::read(source)
                .with_context(|| format!("failed to read {}", source.display()))?;
            fs::write(destination, bytes)
        }
    }
    .with_context(|| format!("failed to write {}", destination.display()))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("toolkit panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("toolkit panicked: {s}")
    } else {
        "toolkit panicked".to_string()
    }
}

/// Background thread that drains the channel and runs commands.
pub struct Poller {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<H>(endpoint: WorkerEndpoint, handle: H) -> std::io::Result<Self>
    where
        H: WindowHandle + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("webproc-poller".to_string())
            .spawn(move || poll_commands(endpoint, handle, stop_for_thread))?;

        Ok(Self { stop, thread })
    }

    /// Asks the poller to finish and waits for it. Returns within one poll interval
    /// unless a command is still executing.
    pub fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.thread.join().is_err() {
            error!("poller thread panicked");
        }
    }
}

fn poll_commands<H: WindowHandle>(
    mut endpoint: WorkerEndpoint,
    handle: H,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        match endpoint.poll(POLL_INTERVAL) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                abandon(&handle, e);
                break;
            }
        }

        let request = match endpoint.recv() {
            Ok(WorkerMessage::Request(request)) => request,
            Ok(WorkerMessage::Shutdown) => {
                debug!("poller: shutdown requested");
                break;
            }
            Err(e) => {
                abandon(&handle, e);
                break;
            }
        };

        let closing = matches!(request.command, Command::Close);
        debug!(request_id = request.id, command = request.command.name(), "dispatching");
        let response = dispatch(&handle, request);
        let close_failed = response.outcome.is_err();

        if let Err(e) = endpoint.send(response) {
            if !(closing && !close_failed) {
                abandon(&handle, e);
            }
            break;
        }

        // Once the window is gone there is nothing left to drive.
        if closing && !close_failed {
            break;
        }
    }
}

/// Nobody is left to send `Close`, so the window goes down with the channel
/// and the event loop returns.
fn abandon<H: WindowHandle>(handle: &H, e: ChannelError) {
    warn!("controller gone ({e}), closing window");
    if let Err(e) = handle.destroy() {
        debug!("window already gone: {e:#}");
    }
}

/// Brings the window up, runs the poller beside the event loop, and tears
/// everything down when the loop returns. Failures that no request can carry
/// are sent as a sentinel response.
pub fn run_worker<T: Toolkit>(
    mut toolkit: T,
    endpoint: WorkerEndpoint,
    config: &WindowConfig,
) -> anyhow::Result<()> {
    let sentinel = endpoint.sender();
    let report = |e: &anyhow::Error| {
        error!("worker failed: {e:#}");
        if sentinel.send(Response::sentinel(format!("{e:#}"))).is_err() {
            debug!("controller gone before the failure could be reported");
        }
    };

    let handle = match toolkit.create(config).context("failed to create window") {
        Ok(handle) => handle,
        Err(e) => {
            report(&e);
            return Err(e);
        }
    };

    let poller = match Poller::spawn(endpoint, handle) {
        Ok(poller) => poller,
        Err(e) => {
            let e = anyhow::Error::from(e).context("failed to spawn poller thread");
            report(&e);
            return Err(e);
        }
    };

    debug!("entering event loop");
    let result = toolkit.run_event_loop();
    poller.stop();

    if let Err(e) = &result {
        report(e);
    }
    debug!("event loop finished");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessToolkit, HeadlessWindow};
    use std::path::PathBuf;
    use webproc_common::channel::pair;
    use webproc_common::{HeadlessScript, ScriptOutcome};

    fn headless(script: HeadlessScript) -> HeadlessWindow {
        HeadlessToolkit::new(script)
            .create(&WindowConfig::new("Test", "http://test"))
            .unwrap()
    }

    fn request(id: u64, command: Command) -> Request {
        Request { id, command }
    }

    #[test]
    fn each_command_answers_with_its_id() {
        let window = headless(HeadlessScript::default());
        let commands = vec![
            Command::Ping,
            Command::Resize {
                width: 640,
                height: 480,
            },
            Command::SetTitle {
                title: "New".into(),
            },
            Command::ToggleFullscreen,
            Command::SetMaximized { maximized: true },
        ];
        for (id, command) in (1..).zip(commands) {
            assert_eq!(dispatch(&window, request(id, command)), Response::ok(id, Payload::Ack));
        }

        let state = window.snapshot();
        assert_eq!((state.width, state.height), (640, 480));
        assert_eq!(state.title, "New");
        assert!(state.fullscreen);
        assert!(state.maximized);

        dispatch(&window, request(9, Command::SetMaximized { maximized: false }));
        assert!(!window.snapshot().maximized);
    }

    #[test]
    fn pick_file_renders_filters() {
        let window = headless(HeadlessScript::default().open_dialog(["a.txt"]));
        let response = dispatch(
            &window,
            request(
                3,
                Command::PickFile {
                    extensions: vec!["txt".into()],
                    multiple: false,
                },
            ),
        );

        assert_eq!(
            response,
            Response::ok(3, Payload::Paths(vec![PathBuf::from("a.txt")]))
        );
        assert_eq!(
            window.snapshot().last_open,
            Some(OpenDialog::Files {
                multiple: false,
                filters: file_filters(&["txt".to_string()]),
            })
        );
    }

    #[test]
    fn pick_folder_uses_folder_dialog() {
        let window = headless(HeadlessScript::default().open_dialog(["/srv/data"]));
        let response = dispatch(&window, request(2, Command::PickFolder));
        assert_eq!(
            response,
            Response::ok(2, Payload::Paths(vec![PathBuf::from("/srv/data")]))
        );
        assert_eq!(window.snapshot().last_open, Some(OpenDialog::Folder));
    }

    #[test]
    fn save_file_writes_utf8_text() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("hello.txt");
        let window = headless(HeadlessScript::default().save_dialog(&destination));

        let response = dispatch(
            &window,
            request(
                5,
                Command::SaveFile {
                    contents: "héllo".into(),
                    file_name: "hello.txt".into(),
                    directory: Some(dir.path().to_path_buf()),
                },
            ),
        );

        assert_eq!(response, Response::ok(5, Payload::Saved(true)));
        assert_eq!(fs::read(&destination).unwrap(), "héllo".as_bytes());
        assert_eq!(
            window.snapshot().last_save,
            Some(("hello.txt".to_string(), Some(dir.path().to_path_buf())))
        );
    }

    #[test]
    fn save_file_writes_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("blob.bin");
        let window = headless(HeadlessScript::default().save_dialog(&destination));

        let bytes = vec![0u8, 159, 146, 150, 255];
        let response = dispatch(
            &window,
            request(
                6,
                Command::SaveFile {
                    contents: FileContents::Bytes(bytes.clone()),
                    file_name: "blob.bin".into(),
                    directory: None,
                },
            ),
        );

        assert_eq!(response, Response::ok(6, Payload::Saved(true)));
        assert_eq!(fs::read(&destination).unwrap(), bytes);
    }

    #[test]
    fn cancelled_save_writes_nothing() {
        let window = headless(HeadlessScript::default());
        let response = dispatch(
            &window,
            request(
                7,
                Command::SaveFile {
                    contents: "data".into(),
                    file_name: "data.txt".into(),
                    directory: None,
                },
            ),
        );
        assert_eq!(response, Response::ok(7, Payload::Saved(false)));
    }

    #[test]
    fn unreadable_source_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("copy.bin");
        let window = headless(HeadlessScript::default().save_dialog(&destination));

        let response = dispatch(
            &window,
            request(
                8,
                Command::SaveFile {
                    contents: FileContents::File(dir.path().join("missing.bin")),
                    file_name: "copy.bin".into(),
                    directory: None,
                },
            ),
        );

        assert_eq!(response.request_id, 8);
        let message = response.outcome.unwrap_err();
        assert!(message.contains("missing.bin"), "{message}");
        assert!(!destination.exists());
    }

    #[test]
    fn script_failure_becomes_error_response() {
        let window = headless(
            HeadlessScript::default()
                .script("boom()", ScriptOutcome::Error("boom is not defined".into())),
        );
        let response = dispatch(
            &window,
            request(
                4,
                Command::EvaluateScript {
                    code: "boom()".into(),
                },
            ),
        );
        assert_eq!(response, Response::error(4, "boom is not defined"));
    }

    struct PanickingWindow;

    impl WindowHandle for PanickingWindow {
        fn resize(&self, _: u32, _: u32) -> anyhow::Result<()> {
            panic!("resize exploded")
        }
        fn set_title(&self, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn toggle_fullscreen(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn maximize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn restore(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn destroy(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn evaluate_script(&self, _: &str) -> anyhow::Result<String> {
            Ok("null".into())
        }
        fn prompt_open(&self, _: OpenDialog) -> anyhow::Result<Vec<PathBuf>> {
            Ok(vec![])
        }
        fn prompt_save(&self, _: &str, _: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
            Ok(None)
        }
    }

    #[test]
    fn toolkit_panic_becomes_error_response() {
        let response = dispatch(
            &PanickingWindow,
            request(
                1,
                Command::Resize {
                    width: 1,
                    height: 1,
                },
            ),
        );
        assert_eq!(response, Response::error(1, "toolkit panicked: resize exploded"));
    }

    #[test]
    fn poller_survives_failures_and_stops_after_close() {
        let (mut controller, worker) = pair().unwrap();
        let mut toolkit = HeadlessToolkit::new(HeadlessScript::default());
        let window = toolkit
            .create(&WindowConfig::new("Test", "http://test"))
            .unwrap();
        let poller = Poller::spawn(worker, window.clone()).unwrap();

        let send = |id, command| controller.send(WorkerMessage::Request(request(id, command)));
        send(
            1,
            Command::EvaluateScript {
                code: "nope".into(),
            },
        )
        .unwrap();
        send(
            2,
            Command::SetTitle {
                title: "still alive".into(),
            },
        )
        .unwrap();
        send(3, Command::Close).unwrap();

        assert!(controller.recv().unwrap().outcome.is_err());
        assert_eq!(controller.recv().unwrap(), Response::ok(2, Payload::Ack));
        assert_eq!(controller.recv().unwrap(), Response::ok(3, Payload::Ack));

        toolkit.run_event_loop().unwrap();
        poller.stop();
        assert_eq!(window.snapshot().title, "still alive");
    }

    #[test]
    fn shutdown_message_stops_the_poller() {
        let (controller, worker) = pair().unwrap();
        let window = headless(HeadlessScript::default());
        let poller = Poller::spawn(worker, window.clone()).unwrap();

        controller.send(WorkerMessage::Shutdown).unwrap();
        poller.stop();
        assert!(!window.snapshot().destroyed);
    }

    #[test]
    fn startup_failure_sends_sentinel() {
        let (mut controller, worker) = pair().unwrap();
        let toolkit = HeadlessToolkit::new(HeadlessScript::default().fail_startup("no display"));

        let err = run_worker(toolkit, worker, &WindowConfig::new("Test", "http://test"))
            .unwrap_err();
        assert!(format!("{err:#}").contains("no display"));

        let response = controller.recv().unwrap();
        assert!(response.is_sentinel());
        assert_eq!(
            response.outcome,
            Err("failed to create window: no display".to_string())
        );
    }

    #[test]
    fn run_worker_applies_initial_flags_and_exits_on_close() {
        let (mut controller, worker) = pair().unwrap();
        let config = WindowConfig::new("Test", "http://test")
            .maximized(true)
            .fullscreen(true);
        let script = r#"document.fullscreenElement !== null"#;

        let handle = thread::spawn(move || {
            run_worker(HeadlessToolkit::new(HeadlessScript::default()), worker, &config)
        });

        controller
            .send(WorkerMessage::Request(request(
                1,
                Command::EvaluateScript {
                    code: script.into(),
                },
            )))
            .unwrap();
        assert_eq!(
            controller.recv().unwrap(),
            Response::ok(1, Payload::Script("true".into()))
        );

        controller
            .send(WorkerMessage::Request(request(2, Command::Close)))
            .unwrap();
        assert_eq!(controller.recv().unwrap(), Response::ok(2, Payload::Ack));

        handle.join().unwrap().unwrap();
    }

    #[test]
    fn lost_controller_destroys_the_window() {
        let (controller, worker) = pair().unwrap();
        let mut toolkit = HeadlessToolkit::new(HeadlessScript::default());
        let window = toolkit
            .create(&WindowConfig::new("Test", "http://test"))
            .unwrap();
        let poller = Poller::spawn(worker, window.clone()).unwrap();

        drop(controller);
        // Returns only once the window has been destroyed.
        toolkit.run_event_loop().unwrap();
        poller.stop();
        assert!(window.snapshot().destroyed);
    }

    #[test]
    fn run_worker_returns_when_the_controller_disappears() {
        let (mut controller, worker) = pair().unwrap();
        let config = WindowConfig::new("Test", "http://test");

        let handle = thread::spawn(move || {
            run_worker(HeadlessToolkit::new(HeadlessScript::default()), worker, &config)
        });

        controller
            .send(WorkerMessage::Request(request(1, Command::Ping)))
            .unwrap();
        assert_eq!(controller.recv().unwrap(), Response::ok(1, Payload::Ack));
        drop(controller);

        handle.join().unwrap().unwrap();
    }
}
