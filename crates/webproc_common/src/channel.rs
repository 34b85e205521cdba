//! Duplex message channel between controller and worker.
//!
//! Built from two ipc-channel pipes, one per direction. ipc-channel frames
//! every message, so a receiver sees whole messages in send order or nothing.

use crate::config::WindowConfig;
use crate::message::{Response, WorkerMessage};
use ipc_channel::ipc::{self, IpcError, IpcReceiver, IpcSender, TryRecvError};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed by peer")]
    Closed,

    #[error("channel transport error: {0}")]
    Transport(String),
}

impl From<IpcError> for ChannelError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Disconnected => ChannelError::Closed,
            other => ChannelError::Transport(format!("{other:?}")),
        }
    }
}

/// One half of the duplex channel: sends `Out`, receives `In`.
///
/// Safe for one sender and one receiver; `recv` and `poll` take `&mut self`
/// because `poll` may stash a message for the next `recv`.
pub struct Endpoint<Out, In>
where
    Out: Serialize + DeserializeOwned,
    In: Serialize + DeserializeOwned,
{
    sender: IpcSender<Out>,
    receiver: IpcReceiver<In>,
    pending: Option<In>,
}

pub type ControllerEndpoint = Endpoint<WorkerMessage, Response>;
pub type WorkerEndpoint = Endpoint<Response, WorkerMessage>;

/// Creates both halves at once, before any worker exists.
pub fn pair() -> Result<(ControllerEndpoint, WorkerEndpoint), ChannelError> {
    let (command_tx, command_rx) =
        ipc::channel::<WorkerMessage>().map_err(|e| ChannelError::Transport(e.to_string()))?;
    let (response_tx, response_rx) =
        ipc::channel::<Response>().map_err(|e| ChannelError::Transport(e.to_string()))?;

    Ok((
        Endpoint::from_parts(command_tx, response_rx),
        Endpoint::from_parts(response_tx, command_rx),
    ))
}

impl<Out, In> Endpoint<Out, In>
where
    Out: Serialize + DeserializeOwned,
    In: Serialize + DeserializeOwned,
{
    pub fn from_parts(sender: IpcSender<Out>, receiver: IpcReceiver<In>) -> Self {
        Self {
            sender,
            receiver,
            pending: None,
        }
    }

    /// Splits the endpoint back into its pipes. A message stashed by `poll` is lost.
    pub fn into_parts(self) -> (IpcSender<Out>, IpcReceiver<In>) {
        (self.sender, self.receiver)
    }

    /// A second handle on the sending pipe.
    pub fn sender(&self) -> IpcSender<Out> {
        self.sender.clone()
    }

    pub fn send(&self, message: Out) -> Result<(), ChannelError> {
        self.sender.send(message).map_err(|e| {
            // The peer going away shows up as an I/O error on the socket.
            debug!("ipc send failed: {e:?}");
            ChannelError::Closed
        })
    }

    /// Blocks until one message arrives. No timeout at this layer.
    pub fn recv(&mut self) -> Result<In, ChannelError> {
        if let Some(message) = self.pending.take() {
            return Ok(message);
        }
        self.receiver.recv().map_err(ChannelError::from)
    }

    /// Reports whether a message is ready within `timeout` without consuming it.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool, ChannelError> {
        if self.pending.is_some() {
            return Ok(true);
        }

        match self.receiver.try_recv_timeout(timeout) {
            Ok(message) => {
                self.pending = Some(message);
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::IpcError(e)) => Err(e.into()),
        }
    }

    /// Receives one message if it shows up within `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<In>, ChannelError> {
        if self.poll(timeout)? {
            self.recv().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// What a freshly spawned worker receives from its controller: its half of
/// the channel and the window configuration. Nothing else crosses over.
#[derive(Serialize, Deserialize)]
pub struct WorkerBootstrap {
    commands: IpcReceiver<WorkerMessage>,
    responses: IpcSender<Response>,
    pub config: WindowConfig,
}

impl WorkerBootstrap {
    pub fn new(endpoint: WorkerEndpoint, config: WindowConfig) -> Self {
        let (responses, commands) = endpoint.into_parts();
        Self {
            commands,
            responses,
            config,
        }
    }

    pub fn into_parts(self) -> (WorkerEndpoint, WindowConfig) {
        (
            Endpoint::from_parts(self.responses, self.commands),
            self.config,
        )
    }
}
