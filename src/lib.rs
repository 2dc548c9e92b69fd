//! Remote DOM proxy: a client-side shadow tree that drives a real DOM living
//! on the other end of a synchronous, id-indexed message channel. Structural
//! mutation, attribute/property sync, selector queries and event dispatch
//! with capture/bubble semantics all cross the channel; the transport and the
//! real DOM are pluggable collaborators.

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

// Re-export the types most callers touch
pub use client::{
    ChildSource, DomError, DomEvent, ElementHandle, FragmentHandle, ListenerId, MarkupError,
    NodeHandle, NodeKind, ParentLink, RemoteDom, TextHandle,
};
pub use protocol::{
    ChannelError, CommandReply, DomCommand, EventNotice, LayoutMetric, MessageChannel, RemoteId,
};
pub use server::{
    BackendError, DomBackend, EventDisposition, HeadlessDom, HeadlessNode, RemoteDomServer,
    SelectorError, ServerError,
};
pub use session::PanelSession;
