//! # Stylesync Port
//!
//! Cross-context RPC substrate: turns a single bidirectional message
//! channel into many concurrent request/response pairs identified by
//! sequence numbers.
//!
//! Isolated execution contexts (the background controller, UI pages,
//! dedicated workers) talk through channel endpoints. A [`PortClient`]
//! multiplexes calls over one channel and detects silent death of its
//! target through an advisory lease; a serving context dispatches
//! inbound requests through a [`CommandSet`] built at startup and may
//! terminate itself after a quiet period unless a keep-alive pin is
//! held.
//!
//! ## Guarantees
//!
//! - Requests on one channel are delivered in send order with strictly
//!   increasing ids; responses resolve out of order by id
//! - Remote errors carry the origin of the local call site
//! - The lease is only ever a liveness beacon, never resource locking
//! - No timeouts are imposed; callers race their own timer if needed

pub mod client;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod hub;
pub mod lease;
pub mod server;

// Re-export main types at crate root
pub use client::{ClientOptions, PortClient, Target, TargetResolver};
pub use endpoint::{
    channel_pair, context_channel, text_channel_pair, ContextHandle, Endpoint, EndpointReceiver,
    EndpointSender, Handshake,
};
pub use error::{CallOrigin, PortError, Result};
pub use frame::{CallId, Envelope, Frame, Request, Response, WireError};
pub use hub::{Hub, WorkerHandle, WorkerOptions};
pub use server::{
    serve_port, CommandFn, CommandResult, CommandSet, Handler, KeepAlivePin, WorkerState,
    IDLE_TIMEOUT,
};
