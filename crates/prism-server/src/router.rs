use std::collections::HashMap;
use std::time::Duration;

use prism_core::backend::{
    BufferOp, CapabilityOp, FileOp, RuntimeOp, SessionContext, StdioOp, SuggestionsOp,
};

use crate::session::Session;

/// Request-method identifiers served by a session.
pub mod methods {
    pub const PING: &str = "session/ping";
    pub const INIT: &str = "session/initProtocolConnection";

    pub const CAPABILITY_ACQUIRE: &str = "capability/acquire";
    pub const CAPABILITY_RELEASE: &str = "capability/release";

    pub const TEXT_OPEN: &str = "text/openFile";
    pub const TEXT_CLOSE: &str = "text/closeFile";
    pub const TEXT_APPLY_EDIT: &str = "text/applyEdit";
    pub const TEXT_SAVE: &str = "text/save";

    pub const FILE_WRITE: &str = "file/write";
    pub const FILE_READ: &str = "file/read";
    pub const FILE_CREATE: &str = "file/create";
    pub const FILE_DELETE: &str = "file/delete";
    pub const FILE_COPY: &str = "file/copy";
    pub const FILE_MOVE: &str = "file/move";
    pub const FILE_EXISTS: &str = "file/exists";
    pub const FILE_LIST: &str = "file/list";
    pub const FILE_TREE: &str = "file/tree";
    pub const FILE_INFO: &str = "file/info";
    pub const FILE_CHECKSUM: &str = "file/checksum";

    pub const CONTEXT_CREATE: &str = "executionContext/create";
    pub const CONTEXT_DESTROY: &str = "executionContext/destroy";
    pub const CONTEXT_PUSH: &str = "executionContext/push";
    pub const CONTEXT_POP: &str = "executionContext/pop";
    pub const CONTEXT_RECOMPUTE: &str = "executionContext/recompute";

    pub const SUGGESTIONS_VERSION: &str = "search/getSuggestionsDatabaseVersion";
    pub const SUGGESTIONS_FETCH: &str = "search/getSuggestionsDatabase";
    pub const SUGGESTIONS_INVALIDATE: &str = "search/invalidateSuggestionsDatabase";
    pub const SUGGESTIONS_COMPLETE: &str = "search/completion";
    pub const SUGGESTIONS_IMPORT: &str = "search/import";

    pub const VISUALISATION_EXECUTE: &str = "visualisation/execute";
    pub const VISUALISATION_ATTACH: &str = "visualisation/attach";
    pub const VISUALISATION_DETACH: &str = "visualisation/detach";
    pub const VISUALISATION_MODIFY: &str = "visualisation/modify";

    pub const STDOUT_REDIRECT: &str = "io/redirectStandardOutput";
    pub const STDOUT_SUPPRESS: &str = "io/suppressStandardOutput";
    pub const STDERR_REDIRECT: &str = "io/redirectStandardError";
    pub const STDERR_SUPPRESS: &str = "io/suppressStandardError";
    pub const STDIN_FEED: &str = "io/feedStandardInput";

    pub const PROJECT_RENAME: &str = "project/rename";
    pub const PROJECT_INFO: &str = "project/info";
}

/// Which worker a routed method constructs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTarget {
    /// Poll the fixed subsystem list and confirm they are all alive.
    Liveness,
    /// Answer from the static project configuration, no backend involved.
    ProjectInfo,
    File(FileOp),
    Buffer(BufferOp),
    Runtime(RuntimeOp),
    Capability(CapabilityOp),
    Suggestions(SuggestionsOp),
    StdOut(StdioOp),
    StdErr(StdioOp),
    StdIn(StdioOp),
}

/// Worker-construction descriptor for one method.
#[derive(Clone, Debug)]
pub struct Route {
    pub target: RouteTarget,
    pub timeout: Duration,
    /// Absent only for the pre-session routes (liveness, project rename).
    pub context: Option<SessionContext>,
}

impl Route {
    /// Descriptor for the requests a connected-but-uninitialised client may
    /// send.
    pub(crate) fn pre_session(target: RouteTarget, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            context: None,
        }
    }
}

/// Every (method, target) binding a session serves. The table itself is
/// built per session because each route carries the session's identity.
const ROUTES: &[(&str, RouteTarget)] = &[
    (methods::PING, RouteTarget::Liveness),
    (methods::CAPABILITY_ACQUIRE, RouteTarget::Capability(CapabilityOp::Acquire)),
    (methods::CAPABILITY_RELEASE, RouteTarget::Capability(CapabilityOp::Release)),
    (methods::TEXT_OPEN, RouteTarget::Buffer(BufferOp::Open)),
    (methods::TEXT_CLOSE, RouteTarget::Buffer(BufferOp::Close)),
    (methods::TEXT_APPLY_EDIT, RouteTarget::Buffer(BufferOp::ApplyEdit)),
    (methods::TEXT_SAVE, RouteTarget::Buffer(BufferOp::Save)),
    (methods::FILE_WRITE, RouteTarget::File(FileOp::Write)),
    (methods::FILE_READ, RouteTarget::File(FileOp::Read)),
    (methods::FILE_CREATE, RouteTarget::File(FileOp::Create)),
    (methods::FILE_DELETE, RouteTarget::File(FileOp::Delete)),
    (methods::FILE_COPY, RouteTarget::File(FileOp::Copy)),
    (methods::FILE_MOVE, RouteTarget::File(FileOp::Move)),
    (methods::FILE_EXISTS, RouteTarget::File(FileOp::Exists)),
    (methods::FILE_LIST, RouteTarget::File(FileOp::List)),
    (methods::FILE_TREE, RouteTarget::File(FileOp::Tree)),
    (methods::FILE_INFO, RouteTarget::File(FileOp::Info)),
    (methods::FILE_CHECKSUM, RouteTarget::File(FileOp::Checksum)),
    (methods::CONTEXT_CREATE, RouteTarget::Runtime(RuntimeOp::CreateContext)),
    (methods::CONTEXT_DESTROY, RouteTarget::Runtime(RuntimeOp::DestroyContext)),
    (methods::CONTEXT_PUSH, RouteTarget::Runtime(RuntimeOp::PushScope)),
    (methods::CONTEXT_POP, RouteTarget::Runtime(RuntimeOp::PopScope)),
    (methods::CONTEXT_RECOMPUTE, RouteTarget::Runtime(RuntimeOp::Recompute)),
    (methods::SUGGESTIONS_VERSION, RouteTarget::Suggestions(SuggestionsOp::Version)),
    (methods::SUGGESTIONS_FETCH, RouteTarget::Suggestions(SuggestionsOp::Fetch)),
    (methods::SUGGESTIONS_INVALIDATE, RouteTarget::Suggestions(SuggestionsOp::Invalidate)),
    (methods::SUGGESTIONS_COMPLETE, RouteTarget::Suggestions(SuggestionsOp::Complete)),
    (methods::SUGGESTIONS_IMPORT, RouteTarget::Suggestions(SuggestionsOp::Import)),
    (methods::VISUALISATION_EXECUTE, RouteTarget::Runtime(RuntimeOp::ExecuteVisualisation)),
    (methods::VISUALISATION_ATTACH, RouteTarget::Runtime(RuntimeOp::AttachVisualisation)),
    (methods::VISUALISATION_DETACH, RouteTarget::Runtime(RuntimeOp::DetachVisualisation)),
    (methods::VISUALISATION_MODIFY, RouteTarget::Runtime(RuntimeOp::ModifyVisualisation)),
    (methods::STDOUT_REDIRECT, RouteTarget::StdOut(StdioOp::Redirect)),
    (methods::STDOUT_SUPPRESS, RouteTarget::StdOut(StdioOp::Suppress)),
    (methods::STDERR_REDIRECT, RouteTarget::StdErr(StdioOp::Redirect)),
    (methods::STDERR_SUPPRESS, RouteTarget::StdErr(StdioOp::Suppress)),
    (methods::STDIN_FEED, RouteTarget::StdIn(StdioOp::Feed)),
    (methods::PROJECT_RENAME, RouteTarget::Runtime(RuntimeOp::RenameProject)),
    (methods::PROJECT_INFO, RouteTarget::ProjectInfo),
];

/// Mapping from request-method identifier to worker descriptor. Built once,
/// immediately after session creation; never mutated afterwards.
#[derive(Debug)]
pub struct RoutingTable {
    entries: HashMap<&'static str, Route>,
}

impl RoutingTable {
    /// Pure function of the session identity and the configured timeout.
    pub fn build(session: &Session, timeout: Duration) -> Self {
        let context = session.context();
        let entries = ROUTES
            .iter()
            .map(|&(method, target)| {
                (
                    method,
                    Route {
                        target,
                        timeout,
                        context: Some(context.clone()),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, method: &str) -> Option<&Route> {
        self.entries.get(method)
    }

    pub fn contains(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
