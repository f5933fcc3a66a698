//! Message-level interface to the backend subsystems.
//!
//! The backends (file manager, buffer registry, execution-context runtime,
//! capability registry, suggestions database, standard-stream controllers)
//! are external collaborators: the controller addresses them only through
//! these commands and never observes their state directly. Each subsystem
//! owns one mailbox; [`ServiceHandle`] is the clonable sending side.

use tokio::sync::{mpsc, oneshot};

use crate::errors::ServiceFault;
use crate::ids::{ClientId, ConnectionId};

/// File-management operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOp {
    Write,
    Read,
    Create,
    Delete,
    Copy,
    Move,
    Exists,
    List,
    Tree,
    Info,
    Checksum,
    /// Workspace metadata consulted while finalizing session initialization.
    ContentRoots,
}

/// Text-buffer operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferOp {
    Open,
    Close,
    ApplyEdit,
    Save,
}

/// Execution-context runtime operations. Visualisations live in the runtime
/// because they are evaluated against an execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeOp {
    CreateContext,
    DestroyContext,
    PushScope,
    PopScope,
    Recompute,
    ExecuteVisualisation,
    AttachVisualisation,
    DetachVisualisation,
    ModifyVisualisation,
    RenameProject,
}

/// Capability registry operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityOp {
    Acquire,
    Release,
}

/// Suggestions-database operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuggestionsOp {
    Version,
    Fetch,
    Invalidate,
    Complete,
    Import,
}

/// Standard-stream controller operations. Output and error streams accept
/// redirect/suppress; the input stream accepts feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StdioOp {
    Redirect,
    Suppress,
    Feed,
}

/// Session-scoped identity stamped onto commands issued on behalf of an
/// initialised client, so backends can attribute work and scope state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
}

pub type ServiceResult = Result<serde_json::Value, ServiceFault>;

/// One message to a backend subsystem.
#[derive(Debug)]
pub enum Command<O> {
    /// Execute one operation and reply exactly once on `reply`.
    Invoke {
        op: O,
        params: serde_json::Value,
        /// Absent only for the pre-session requests.
        origin: Option<SessionContext>,
        reply: oneshot::Sender<ServiceResult>,
    },
    /// Liveness probe.
    Ping { reply: oneshot::Sender<()> },
}

/// The subsystem's mailbox is closed.
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("backend subsystem unavailable")]
pub struct ServiceUnavailable;

/// Clonable sending side of one backend subsystem's mailbox.
#[derive(Debug)]
pub struct ServiceHandle<O> {
    tx: mpsc::Sender<Command<O>>,
}

impl<O> Clone for ServiceHandle<O> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<O> ServiceHandle<O> {
    /// Create a handle together with the receiving side the subsystem drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command<O>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Send one command. Fails only if the subsystem is gone.
    pub async fn send(&self, command: Command<O>) -> Result<(), ServiceUnavailable> {
        self.tx.send(command).await.map_err(|_| ServiceUnavailable)
    }
}

/// Handles to every backend subsystem a controller is wired with. Shared
/// read-only: handles are used for sending, never for direct state mutation.
#[derive(Clone, Debug)]
pub struct Services {
    pub files: ServiceHandle<FileOp>,
    pub buffers: ServiceHandle<BufferOp>,
    pub runtime: ServiceHandle<RuntimeOp>,
    pub capabilities: ServiceHandle<CapabilityOp>,
    pub suggestions: ServiceHandle<SuggestionsOp>,
    pub stdout: ServiceHandle<StdioOp>,
    pub stderr: ServiceHandle<StdioOp>,
    pub stdin: ServiceHandle<StdioOp>,
}
