use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub type RequestId = u64;

/// Reserved ID for responses that answer no request at all (startup or
/// event-loop failure). Seeing it on the controller side is always fatal.
pub const SENTINEL_REQUEST_ID: RequestId = 0;

/// Window operations the controller can ask the worker to perform.
///
/// The worker matches on this exhaustively, so adding a variant means adding
/// a dispatch arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Close,
    Resize {
        width: u32,
        height: u32,
    },
    SetTitle {
        title: String,
    },
    ToggleFullscreen,
    SetMaximized {
        maximized: bool,
    },
    PickFile {
        extensions: Vec<String>,
        multiple: bool,
    },
    PickFolder,
    SaveFile {
        contents: FileContents,
        file_name: String,
        directory: Option<PathBuf>,
    },
    EvaluateScript {
        code: String,
    },
    Ping,
}

impl Command {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Close => "close",
            Command::Resize { .. } => "resize",
            Command::SetTitle { .. } => "set_title",
            Command::ToggleFullscreen => "toggle_fullscreen",
            Command::SetMaximized { .. } => "set_maximized",
            Command::PickFile { .. } => "pick_file",
            Command::PickFolder => "pick_folder",
            Command::SaveFile { .. } => "save_file",
            Command::EvaluateScript { .. } => "evaluate_script",
            Command::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

/// Everything that travels from the controller to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerMessage {
    Request(Request),
    /// Stops the worker's poller without touching the window.
    Shutdown,
}

/// Payload of a `SaveFile` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileContents {
    /// Written UTF-8 encoded.
    Text(String),
    /// Written verbatim.
    Bytes(Vec<u8>),
    /// Bytes of an existing file, read by the worker before anything is written.
    File(PathBuf),
}

impl From<&str> for FileContents {
    fn from(text: &str) -> Self {
        FileContents::Text(text.to_string())
    }
}

impl From<String> for FileContents {
    fn from(text: String) -> Self {
        FileContents::Text(text)
    }
}

impl From<Vec<u8>> for FileContents {
    fn from(bytes: Vec<u8>) -> Self {
        FileContents::Bytes(bytes)
    }
}

impl From<&[u8]> for FileContents {
    fn from(bytes: &[u8]) -> Self {
        FileContents::Bytes(bytes.to_vec())
    }
}

impl From<&Path> for FileContents {
    fn from(path: &Path) -> Self {
        FileContents::File(path.to_path_buf())
    }
}

/// Successful results, one shape per family of commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Ack,
    Saved(bool),
    Paths(Vec<PathBuf>),
    /// Script result serialized as JSON text.
    Script(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: RequestId,
    pub outcome: Result<Payload, String>,
}

impl Response {
    pub fn ok(request_id: RequestId, payload: Payload) -> Self {
        Self {
            request_id,
            outcome: Ok(payload),
        }
    }

    pub fn error(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            outcome: Err(message.into()),
        }
    }

    /// A failure nobody asked about: the worker could not bring its window up.
    pub fn sentinel(message: impl Into<String>) -> Self {
        Self::error(SENTINEL_REQUEST_ID, message)
    }

    pub fn is_sentinel(&self) -> bool {
        self.request_id == SENTINEL_REQUEST_ID
    }
}

/// A file-type filter for open dialogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFilter {
    pub label: String,
    pub extensions: Vec<String>,
}

/// Renders extensions as `"txt (*.txt)"` filters. No extensions, no filters.
pub fn file_filters(extensions: &[String]) -> Vec<FileFilter> {
    extensions
        .iter()
        .map(|ext| {
            let ext = ext.trim_start_matches('.');
            FileFilter {
                label: format!("{ext} (*.{ext})"),
                extensions: vec![ext.to_string()],
            }
        })
        .collect()
}
