use crate::error::{Error, Result};
use crate::supervisor::{resolve_worker_path, WorkerProcess};
use ipc_channel::ipc::{self, IpcOneShotServer, IpcSender};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use webproc_common::{
    channel, Command, ControllerEndpoint, FileContents, Payload, Request, RequestId, Response,
    WindowConfig, WorkerBootstrap, WorkerMessage,
};

/// Pings sent before giving up on a worker that keeps answering with errors.
pub const HANDSHAKE_ATTEMPTS: u32 = 3;

/// How long `Drop` waits for the worker to acknowledge `Close`.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// How often `start` checks on the worker while waiting for it to connect.
const CONNECT_POLL: Duration = Duration::from_millis(50);

type CloseCallback = Box<dyn FnOnce() + Send>;

/// Result of a file picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Picked {
    None,
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl Picked {
    fn from_paths(paths: Vec<PathBuf>, multiple: bool) -> Self {
        if multiple {
            return Picked::Many(paths);
        }
        match paths.into_iter().next() {
            Some(path) => Picked::One(path),
            None => Picked::None,
        }
    }
}

/// A webview window living in its own worker process.
///
/// Every call blocks until the worker answers. Dropping a running façade
/// closes the window and kills the worker.
pub struct WebViewProcess {
    config: WindowConfig,
    worker_path: Option<PathBuf>,
    endpoint: Option<ControllerEndpoint>,
    process: Option<WorkerProcess>,
    alive: bool,
    request_id: RequestId,
    on_close: Option<CloseCallback>,
}

impl WebViewProcess {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            worker_path: None,
            endpoint: None,
            process: None,
            alive: false,
            request_id: 0,
            on_close: None,
        }
    }

    /// Uses this worker binary instead of looking one up.
    pub fn worker_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_path = Some(path.into());
        self
    }

    /// Starts the worker and waits until its window answers a ping.
    pub fn start(&mut self) -> Result<()> {
        if self.is_alive() {
            return Err(Error::AlreadyRunning);
        }
        // A previous run that was closed but never joined.
        self.reap();

        let worker_path =
            resolve_worker_path(self.worker_path.as_deref()).ok_or(Error::WorkerNotFound)?;

        let (controller, worker) = channel::pair()?;
        let (server, server_name) = IpcOneShotServer::<IpcSender<WorkerBootstrap>>::new()
            .map_err(|e| Error::Startup(format!("failed to create bootstrap server: {e}")))?;

        let mut process = WorkerProcess::spawn(&worker_path, &server_name).map_err(Error::Spawn)?;
        debug!(pid = process.id(), "worker spawned");

        let bootstrap = match accept_worker(server, &server_name, &mut process) {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                let _ = process.terminate();
                let _ = process.join();
                return Err(e);
            }
        };

        if let Err(e) = bootstrap.send(WorkerBootstrap::new(worker, self.config.clone())) {
            let _ = process.terminate();
            let _ = process.join();
            return Err(Error::Startup(format!(
                "failed to hand bootstrap to worker: {e:?}"
            )));
        }

        self.endpoint = Some(controller);
        self.process = Some(process);
        self.alive = true;

        if let Err(e) = self.handshake() {
            warn!("worker failed to start: {e}");
            self.alive = false;
            self.kill();
            return Err(e);
        }

        debug!("webview process is up");
        Ok(())
    }

    fn handshake(&mut self) -> Result<()> {
        let mut last_error = String::new();

        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            let id = self.next_request_id();
            self.send(WorkerMessage::Request(Request {
                id,
                command: Command::Ping,
            }))?;

            loop {
                let response = self.receive()?;
                if response.is_sentinel() {
                    return Err(Error::Startup(sentinel_message(response)));
                }
                if response.request_id != id {
                    debug!(request_id = response.request_id, "discarding stale response");
                    continue;
                }
                match response.outcome {
                    Ok(_) => return Ok(()),
                    Err(message) => {
                        debug!(attempt, "ping failed: {message}");
                        last_error = message;
                        break;
                    }
                }
            }
        }

        Err(Error::Startup(format!(
            "worker did not answer ping after {HANDSHAKE_ATTEMPTS} attempts: {last_error}"
        )))
    }

    fn next_request_id(&mut self) -> RequestId {
        self.request_id += 1;
        self.request_id
    }

    fn send(&mut self, message: WorkerMessage) -> Result<()> {
        let endpoint = self.endpoint.as_ref().ok_or(Error::NotRunning)?;
        endpoint.send(message).map_err(|e| {
            self.alive = false;
            Error::Channel(e)
        })
    }

    fn receive(&mut self) -> Result<Response> {
        let endpoint = self.endpoint.as_mut().ok_or(Error::NotRunning)?;
        match endpoint.recv() {
            Ok(response) => Ok(response),
            Err(e) => {
                self.alive = false;
                Err(Error::Channel(e))
            }
        }
    }

    /// Sends one command and waits for the response carrying its ID.
    fn round_trip(&mut self, command: Command) -> Result<Payload> {
        if !self.alive {
            return Err(Error::NotRunning);
        }

        let id = self.next_request_id();
        let name = command.name();
        debug!(request_id = id, "sending {name}");
        self.send(WorkerMessage::Request(Request { id, command }))?;

        loop {
            let response = self.receive()?;
            if response.is_sentinel() {
                self.alive = false;
                return Err(Error::Worker(sentinel_message(response)));
            }
            if response.request_id != id {
                debug!(
                    request_id = response.request_id,
                    expected = id,
                    "discarding stale response"
                );
                continue;
            }
            return response.outcome.map_err(Error::Command);
        }
    }

    fn expect_ack(&mut self, command: Command) -> Result<()> {
        let name = command.name();
        match self.round_trip(command)? {
            Payload::Ack => Ok(()),
            other => Err(unexpected(name, other)),
        }
    }

    /// Closes the window. The façade counts as stopped afterwards whatever
    /// the worker answers.
    pub fn close(&mut self) -> Result<()> {
        let result = self.expect_ack(Command::Close);
        self.alive = false;
        result
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.expect_ack(Command::Resize { width, height })
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.expect_ack(Command::SetTitle {
            title: title.to_string(),
        })
    }

    pub fn toggle_fullscreen(&mut self) -> Result<()> {
        self.expect_ack(Command::ToggleFullscreen)
    }

    pub fn set_maximized(&mut self, maximized: bool) -> Result<()> {
        self.expect_ack(Command::SetMaximized { maximized })
    }

    /// Shows an open-file dialog filtered to `extensions` (none means any file).
    pub fn pick_file(&mut self, extensions: &[&str], multiple: bool) -> Result<Picked> {
        let command = Command::PickFile {
            extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            multiple,
        };
        match self.round_trip(command)? {
            Payload::Paths(paths) => Ok(Picked::from_paths(paths, multiple)),
            other => Err(unexpected("pick_file", other)),
        }
    }

    pub fn pick_folder(&mut self) -> Result<Option<PathBuf>> {
        match self.round_trip(Command::PickFolder)? {
            Payload::Paths(paths) => Ok(paths.into_iter().next()),
            other => Err(unexpected("pick_folder", other)),
        }
    }

    /// Asks the user where to save `contents`. Returns `false` if the dialog
    /// was cancelled.
    pub fn save_file(
        &mut self,
        contents: impl Into<FileContents>,
        file_name: &str,
        directory: Option<&Path>,
    ) -> Result<bool> {
        let command = Command::SaveFile {
            contents: contents.into(),
            file_name: file_name.to_string(),
            directory: directory.map(Path::to_path_buf),
        };
        match self.round_trip(command)? {
            Payload::Saved(saved) => Ok(saved),
            other => Err(unexpected("save_file", other)),
        }
    }

    /// Runs `code` in the page and returns its result. `undefined` comes back
    /// as `Null`.
    pub fn evaluate_script(&mut self, code: &str) -> Result<serde_json::Value> {
        let command = Command::EvaluateScript {
            code: code.to_string(),
        };
        match self.round_trip(command)? {
            Payload::Script(json) if json.trim().is_empty() => Ok(serde_json::Value::Null),
            Payload::Script(json) => serde_json::from_str(&json)
                .map_err(|e| Error::Protocol(format!("script result is not JSON: {e}"))),
            other => Err(unexpected("evaluate_script", other)),
        }
    }

    /// Waits for the worker to exit and returns its exit code.
    pub fn join(&mut self) -> Result<Option<i32>> {
        self.alive = false;
        let Some(mut process) = self.process.take() else {
            return Ok(None);
        };
        let status = process.join().map_err(Error::Wait);
        self.endpoint = None;
        self.fire_on_close();
        Ok(status?.code())
    }

    /// OS process ID of the worker, while one is held.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(WorkerProcess::id)
    }

    pub fn is_alive(&mut self) -> bool {
        if self.alive {
            if let Some(process) = self.process.as_mut() {
                if !process.is_running() {
                    debug!("worker exited on its own");
                    self.alive = false;
                }
            }
        }
        self.alive
    }

    /// Runs `callback` once, after the worker process has been reaped.
    pub fn on_close(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.on_close = Some(Box::new(callback));
    }

    /// Starts a window for the duration of `f`, then closes it and waits for
    /// the worker, whatever `f` returned.
    pub fn scope<R>(
        config: WindowConfig,
        f: impl FnOnce(&mut WebViewProcess) -> Result<R>,
    ) -> Result<R> {
        Self::new(config).run_scoped(f)
    }

    /// Like [`WebViewProcess::scope`] for an already configured façade.
    pub fn run_scoped<R>(mut self, f: impl FnOnce(&mut WebViewProcess) -> Result<R>) -> Result<R> {
        self.start()?;
        let result = f(&mut self);
        if self.is_alive() {
            if let Err(e) = self.close() {
                warn!("failed to close window: {e}");
            }
        }
        self.join()?;
        result
    }

    fn fire_on_close(&mut self) {
        if let Some(callback) = self.on_close.take() {
            callback();
        }
    }

    /// Kills and reaps a worker that is still held.
    fn kill(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.terminate() {
                warn!(pid = process.id(), "failed to terminate worker: {e}");
            }
            if let Err(e) = process.join() {
                warn!(pid = process.id(), "failed to reap worker: {e}");
            }
            self.fire_on_close();
        }
        self.endpoint = None;
    }

    fn reap(&mut self) {
        if self.process.is_some() {
            self.kill();
        }
    }

    /// Best-effort close: the worker gets `CLOSE_GRACE` to acknowledge.
    fn close_with_grace(&mut self) {
        let id = self.next_request_id();
        let Some(endpoint) = self.endpoint.as_mut() else {
            return;
        };
        if endpoint
            .send(WorkerMessage::Request(Request {
                id,
                command: Command::Close,
            }))
            .is_err()
        {
            return;
        }

        let deadline = Instant::now() + CLOSE_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("worker did not acknowledge close in time");
                break;
            }
            match endpoint.recv_timeout(remaining) {
                Ok(Some(response)) if response.request_id == id || response.is_sentinel() => break,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        let _ = endpoint.send(WorkerMessage::Shutdown);
    }

    #[cfg(test)]
    fn attached(config: WindowConfig, endpoint: ControllerEndpoint) -> Self {
        let mut process = Self::new(config);
        process.endpoint = Some(endpoint);
        process.alive = true;
        process
    }
}

impl Drop for WebViewProcess {
    fn drop(&mut self) {
        if self.alive {
            debug!("dropping a running webview process");
            self.close_with_grace();
            self.alive = false;
        }
        self.kill();
    }
}

/// Waits for the freshly spawned worker to connect, giving up if it exits first.
fn accept_worker(
    server: IpcOneShotServer<IpcSender<WorkerBootstrap>>,
    server_name: &str,
    process: &mut WorkerProcess,
) -> Result<IpcSender<WorkerBootstrap>> {
    let (accepted_tx, accepted_rx) = mpsc::channel();
    let acceptor = thread::Builder::new()
        .name("webproc-accept".to_string())
        .spawn(move || {
            let accepted = server
                .accept()
                .map(|(_, sender)| sender)
                .map_err(|e| format!("{e:?}"));
            let _ = accepted_tx.send(accepted);
        })
        .map_err(Error::Spawn)?;

    loop {
        match accepted_rx.recv_timeout(CONNECT_POLL) {
            Ok(accepted) => {
                let _ = acceptor.join();
                return accepted
                    .map_err(|e| Error::Startup(format!("worker failed to connect: {e}")));
            }
            Err(mpsc::RecvTimeoutError::Timeout) if process.is_running() => continue,
            Err(_) => break,
        }
    }

    // The worker is gone; connect ourselves so the acceptor thread returns.
    if let Ok(unblock) = IpcSender::<IpcSender<WorkerBootstrap>>::connect(server_name.to_string()) {
        if let Ok((dummy, _)) = ipc::channel::<WorkerBootstrap>() {
            let _ = unblock.send(dummy);
        }
    }
    let _ = acceptor.join();
    Err(Error::Startup(
        "worker exited before connecting".to_string(),
    ))
}

fn sentinel_message(response: Response) -> String {
    match response.outcome {
        Err(message) => message,
        Ok(_) => "worker reported an unspecified failure".to_string(),
    }
}

fn unexpected(command: &str, payload: Payload) -> Error {
    Error::Protocol(format!("unexpected reply to {command}: {payload:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;
    use webproc_common::{channel, WorkerEndpoint};

    fn config() -> WindowConfig {
        WindowConfig::new("Test", "about:blank")
    }

    /// Runs a stand-in worker answering each request with whatever `reply` returns.
    fn fake_worker(
        mut reply: impl FnMut(Request) -> Vec<Response> + Send + 'static,
    ) -> (WebViewProcess, thread::JoinHandle<()>) {
        let (controller, mut worker): (ControllerEndpoint, WorkerEndpoint) =
            channel::pair().unwrap();
        let handle = thread::spawn(move || {
            while let Ok(WorkerMessage::Request(request)) = worker.recv() {
                for response in reply(request) {
                    if worker.send(response).is_err() {
                        return;
                    }
                }
            }
        });
        (WebViewProcess::attached(config(), controller), handle)
    }

    fn acking(request: Request) -> Vec<Response> {
        vec![Response::ok(request.id, Payload::Ack)]
    }

    #[test]
    fn request_ids_start_at_one_and_increase() {
        let (ids_tx, ids_rx) = mpsc::channel();
        let (mut process, handle) = fake_worker(move |request| {
            ids_tx.send(request.id).unwrap();
            acking(request)
        });

        process.set_title("a").unwrap();
        process.resize(10, 20).unwrap();
        process.toggle_fullscreen().unwrap();
        process.close().unwrap();
        drop(process);
        handle.join().unwrap();

        let ids: Vec<RequestId> = ids_rx.iter().collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn stale_and_duplicate_responses_are_discarded() {
        let (mut process, _handle) = fake_worker(|request| {
            vec![
                Response::ok(request.id + 100, Payload::Paths(vec!["/stale".into()])),
                Response::error(request.id + 50, "old failure"),
                Response::ok(request.id, Payload::Paths(vec!["/fresh".into()])),
                Response::ok(request.id, Payload::Paths(vec!["/duplicate".into()])),
            ]
        });

        assert_eq!(
            process.pick_file(&[], false).unwrap(),
            Picked::One("/fresh".into())
        );
        // The duplicate from the previous round trip is skipped here.
        assert_eq!(process.pick_folder().unwrap(), Some("/fresh".into()));
    }

    #[test]
    fn pick_file_unwraps_single_selection() {
        let (mut process, _handle) = fake_worker(|request| {
            let paths = match &request.command {
                Command::PickFile { extensions, .. } if extensions.is_empty() => vec![],
                _ => vec![PathBuf::from("/home/user/a.txt")],
            };
            vec![Response::ok(request.id, Payload::Paths(paths))]
        });

        assert_eq!(
            process.pick_file(&["txt"], false).unwrap(),
            Picked::One("/home/user/a.txt".into())
        );
        assert_eq!(
            process.pick_file(&["txt"], true).unwrap(),
            Picked::Many(vec!["/home/user/a.txt".into()])
        );
        assert_eq!(process.pick_file(&[], false).unwrap(), Picked::None);
        assert_eq!(process.pick_file(&[], true).unwrap(), Picked::Many(vec![]));
    }

    #[test]
    fn command_error_carries_worker_message() {
        let (mut process, _handle) = fake_worker(|request| match request.command {
            Command::EvaluateScript { .. } => vec![Response::error(
                request.id,
                "ReferenceError: nope is not defined",
            )],
            _ => acking(request),
        });

        let err = process.evaluate_script("nope").unwrap_err();
        assert!(matches!(err, Error::Command(_)));
        assert_eq!(err.to_string(), "ReferenceError: nope is not defined");
        // A failed command leaves the window usable.
        assert!(process.is_alive());
        process.set_title("still here").unwrap();
    }

    #[test]
    fn script_results_are_parsed_as_json() {
        let (mut process, _handle) = fake_worker(|request| {
            let json = match &request.command {
                Command::EvaluateScript { code } => code.clone(),
                _ => String::new(),
            };
            vec![Response::ok(request.id, Payload::Script(json))]
        });

        assert_eq!(
            process.evaluate_script(r#"{"a":[1,2]}"#).unwrap(),
            json!({"a": [1, 2]})
        );
        assert_eq!(process.evaluate_script("").unwrap(), serde_json::Value::Null);
        assert!(matches!(
            process.evaluate_script("not json").unwrap_err(),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn wrong_payload_shape_is_a_protocol_error() {
        let (mut process, _handle) =
            fake_worker(|request| vec![Response::ok(request.id, Payload::Saved(true))]);
        assert!(matches!(
            process.resize(1, 1).unwrap_err(),
            Error::Protocol(_)
        ));
    }

    #[test]
    fn sentinel_is_fatal() {
        let (mut process, _handle) =
            fake_worker(|_| vec![Response::sentinel("event loop crashed")]);

        let err = process.set_title("x").unwrap_err();
        assert!(matches!(err, Error::Worker(ref message) if message == "event loop crashed"));
        assert_eq!(err.to_string(), "webview process failed: event loop crashed");
        assert!(!process.is_alive());
        assert!(matches!(process.set_title("y").unwrap_err(), Error::NotRunning));
    }

    #[test]
    fn calls_before_start_and_after_close_are_refused() {
        let mut fresh = WebViewProcess::new(config());
        assert!(matches!(fresh.resize(1, 1).unwrap_err(), Error::NotRunning));
        assert!(!fresh.is_alive());
        assert_eq!(fresh.join().unwrap(), None);

        let (mut process, _handle) = fake_worker(acking);
        process.close().unwrap();
        assert!(!process.is_alive());
        assert!(matches!(process.set_title("x").unwrap_err(), Error::NotRunning));
    }

    #[test]
    fn close_marks_stopped_even_on_error() {
        let (mut process, _handle) =
            fake_worker(|request| vec![Response::error(request.id, "window already gone")]);
        assert!(process.close().is_err());
        assert!(!process.is_alive());
    }

    #[test]
    fn lost_channel_marks_not_alive() {
        let (controller, worker) = channel::pair().unwrap();
        drop(worker);
        let mut process = WebViewProcess::attached(config(), controller);

        let err = process.resize(5, 5).unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
        assert!(!process.is_alive());
        assert!(matches!(process.resize(5, 5).unwrap_err(), Error::NotRunning));
    }

    #[test]
    fn handshake_retries_failed_pings() {
        let mut pings = 0;
        let (mut process, _handle) = fake_worker(move |request| {
            pings += 1;
            if pings < HANDSHAKE_ATTEMPTS {
                vec![Response::error(request.id, "window not ready")]
            } else {
                acking(request)
            }
        });
        process.handshake().unwrap();
        assert_eq!(process.request_id, RequestId::from(HANDSHAKE_ATTEMPTS));
    }

    #[test]
    fn handshake_gives_up_after_bounded_attempts() {
        let (mut process, _handle) =
            fake_worker(|request| vec![Response::error(request.id, "window not ready")]);
        let err = process.handshake().unwrap_err();
        assert!(
            matches!(err, Error::Startup(ref message) if message.ends_with("window not ready"))
        );
        assert_eq!(process.request_id, RequestId::from(HANDSHAKE_ATTEMPTS));
    }

    #[test]
    fn handshake_discards_stale_responses() {
        let (mut process, _handle) = fake_worker(|request| {
            vec![
                Response::error(request.id + 7, "leftover failure"),
                Response::ok(request.id + 3, Payload::Ack),
                Response::ok(request.id, Payload::Ack),
            ]
        });
        process.handshake().unwrap();
        assert_eq!(process.request_id, 1);
    }

    #[test]
    fn handshake_sentinel_is_fatal_immediately() {
        let (mut process, _handle) = fake_worker(|_| vec![Response::sentinel("no display")]);
        let err = process.handshake().unwrap_err();
        assert!(matches!(err, Error::Startup(ref message) if message == "no display"));
        assert_eq!(process.request_id, 1);
    }

    #[test]
    fn dropping_a_live_process_closes_the_window() {
        let (commands_tx, commands_rx) = mpsc::channel();
        let (process, handle) = fake_worker(move |request| {
            commands_tx.send(request.command.clone()).unwrap();
            acking(request)
        });

        drop(process);
        handle.join().unwrap();
        let commands: Vec<Command> = commands_rx.iter().collect();
        assert_eq!(commands, vec![Command::Close]);
    }
}
