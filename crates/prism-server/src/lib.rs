//! Prism's RPC front end: one session controller per client connection,
//! mediating between the transport layer and the backend subsystems.
//!
//! The transport hands a controller decoded frames and a connect/disconnect
//! signal; the controller tracks session lifecycle, buffers out-of-order
//! input, spawns a deadline-bound worker per routed request, and fans
//! backend domain events into the client's outbound notification stream.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod session;
pub mod worker;

pub use config::{ControllerConfig, ProjectConfig, UnknownMethodPolicy};
pub use controller::{Controller, ControllerHandle, ControllerInput, EventSink};
pub use protocol::{ClientSink, Notification, OutboundMessage, RpcError, RpcRequest, RpcResponse};
pub use registry::ControllerRegistry;
pub use router::{methods, Route, RouteTarget, RoutingTable};
pub use session::{InitError, ResourceInitializer, Session};
