//! Server side of the remote DOM: applies client-issued commands to a real
//! DOM behind [`DomBackend`] and forwards real events back to the client.

pub mod backend;
pub mod headless;

use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::protocol::{CommandReply, DomCommand, EventNotice, RemoteId};

pub use self::backend::{BackendError, DomBackend, SelectorError};
pub use self::headless::{HeadlessDom, HeadlessNode};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no cached node for id {0}")]
    UnknownId(RemoteId),
    #[error("id {0} is already cached")]
    DuplicateId(RemoteId),
    #[error("listener count underflow for {event:?} on id {id}")]
    ListenerUnderflow { id: RemoteId, event: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What became of a real DOM event offered to [`RemoteDomServer::prepare_event`]
/// and then dispatched through the client's shadow tree.
///
/// For `Handled` targets the host must suppress the real event's native
/// propagation — capture/bubble delivery is entirely the client's job — and
/// additionally call the real `preventDefault` when `default_prevented` says
/// so. `Unmanaged` events are left entirely to the native engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    Unmanaged,
    Handled { default_prevented: bool },
}

/// Dispatches protocol commands against a backend and keeps the
/// bidirectional id registry for one connection.
pub struct RemoteDomServer<B: DomBackend> {
    backend: B,
    nodes: HashMap<RemoteId, B::Node>,
    ids: HashMap<B::Node, RemoteId>,
    /// (node id, event type) -> logical listener count. The backend-level
    /// listener exists exactly while the count is nonzero.
    listener_counts: HashMap<(RemoteId, String), usize>,
}

impl<B: DomBackend> RemoteDomServer<B> {
    pub fn new(backend: B) -> Self {
        RemoteDomServer {
            backend,
            nodes: HashMap::new(),
            ids: HashMap::new(),
            listener_counts: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn node_for(&self, id: RemoteId) -> Option<&B::Node> {
        self.nodes.get(&id)
    }

    pub fn id_for(&self, node: &B::Node) -> Option<RemoteId> {
        self.ids.get(node).copied()
    }

    /// Apply one command addressed to `target`. Misuse of the protocol
    /// (unknown ids, duplicate creation, listener underflow) is a hard error;
    /// a bad selector is an ordinary reply.
    pub fn handle_message(
        &mut self,
        target: RemoteId,
        command: DomCommand,
    ) -> Result<CommandReply, ServerError> {
        trace!(target: "teledom", id = target.get(), command = command.name(), "dispatch");
        match command {
            DomCommand::CreateAndCacheElement { tag_name } => {
                if self.nodes.contains_key(&target) {
                    return Err(ServerError::DuplicateId(target));
                }
                let node = self.backend.create_element(&tag_name);
                self.cache(target, node);
                Ok(CommandReply::None)
            }
            DomCommand::CreateAndCacheTextNode { text } => {
                if self.nodes.contains_key(&target) {
                    return Err(ServerError::DuplicateId(target));
                }
                let node = self.backend.create_text_node(&text);
                self.cache(target, node);
                Ok(CommandReply::None)
            }
            DomCommand::RemoveNodeFromCache => {
                let node = self
                    .nodes
                    .remove(&target)
                    .ok_or(ServerError::UnknownId(target))?;
                self.ids.remove(&node);
                self.listener_counts.retain(|(id, _), _| *id != target);
                Ok(CommandReply::None)
            }
            DomCommand::AddListener { event } => {
                let node = self.resolve(target)?.clone();
                let count = self
                    .listener_counts
                    .entry((target, event.clone()))
                    .or_insert(0);
                *count += 1;
                if *count == 1 {
                    self.backend.watch_events(&node, &event)?;
                }
                Ok(CommandReply::None)
            }
            DomCommand::RemoveListener { event } => {
                let node = self.resolve(target)?.clone();
                let key = (target, event.clone());
                let count =
                    self.listener_counts
                        .get_mut(&key)
                        .ok_or(ServerError::ListenerUnderflow {
                            id: target,
                            event: event.clone(),
                        })?;
                *count -= 1;
                if *count == 0 {
                    self.listener_counts.remove(&key);
                    self.backend.unwatch_events(&node, &event)?;
                }
                Ok(CommandReply::None)
            }
            DomCommand::AppendChild { child } => {
                let parent = self.resolve(target)?.clone();
                let child = self.resolve(child)?.clone();
                self.backend.append_child(&parent, &child)?;
                Ok(CommandReply::None)
            }
            DomCommand::RemoveChild { child } => {
                let parent = self.resolve(target)?.clone();
                let child = self.resolve(child)?.clone();
                self.backend.remove_child(&parent, &child)?;
                Ok(CommandReply::None)
            }
            DomCommand::InsertBefore { child, before } => {
                let parent = self.resolve(target)?.clone();
                let child = self.resolve(child)?.clone();
                let before = match before {
                    Some(id) => Some(self.resolve(id)?.clone()),
                    None => None,
                };
                self.backend.insert_before(&parent, &child, before.as_ref())?;
                Ok(CommandReply::None)
            }
            DomCommand::SetAttribute { name, value } => {
                let node = self.resolve(target)?.clone();
                self.backend.set_attribute(&node, &name, &value)?;
                Ok(CommandReply::None)
            }
            DomCommand::RemoveAttribute { name } => {
                let node = self.resolve(target)?.clone();
                self.backend.remove_attribute(&node, &name)?;
                Ok(CommandReply::None)
            }
            DomCommand::Focus => {
                let node = self.resolve(target)?.clone();
                self.backend.focus(&node)?;
                Ok(CommandReply::None)
            }
            DomCommand::SetTextContent { value } => {
                let node = self.resolve(target)?.clone();
                self.backend.set_text_content(&node, &value)?;
                Ok(CommandReply::None)
            }
            DomCommand::SetValue { value } => {
                let node = self.resolve(target)?.clone();
                self.backend.set_value(&node, &value)?;
                Ok(CommandReply::None)
            }
            DomCommand::QuerySelector { selector } => {
                let node = self.resolve(target)?.clone();
                match self.backend.query_selector(&node, &selector) {
                    Ok(found) => Ok(CommandReply::Match {
                        node: found.and_then(|n| self.ids.get(&n).copied()),
                    }),
                    Err(_) => Ok(CommandReply::InvalidSelector),
                }
            }
            DomCommand::QuerySelectorAll { selector } => {
                let node = self.resolve(target)?.clone();
                match self.backend.query_selector_all(&node, &selector) {
                    Ok(found) => Ok(CommandReply::Matches {
                        nodes: found
                            .into_iter()
                            .filter_map(|n| self.ids.get(&n).copied())
                            .collect(),
                    }),
                    Err(_) => Ok(CommandReply::InvalidSelector),
                }
            }
            DomCommand::GetMetric { metric } => {
                let node = self.resolve(target)?.clone();
                let value = self.backend.metric(&node, metric)?;
                Ok(CommandReply::Metric { value })
            }
            DomCommand::SetScroll { axis, value } => {
                let node = self.resolve(target)?.clone();
                self.backend.set_scroll(&node, axis, value)?;
                Ok(CommandReply::None)
            }
            DomCommand::RemoteScrollTo {
                scrollbox,
                align_x,
                align_y,
                scroll_when_visible,
            } => {
                let node = self.resolve(target)?.clone();
                let scrollbox = self.resolve(scrollbox)?.clone();
                self.backend.scroll_to(
                    &node,
                    &scrollbox,
                    align_x.as_deref(),
                    align_y.as_deref(),
                    scroll_when_visible,
                )?;
                Ok(CommandReply::None)
            }
        }
    }

    /// First half of event forwarding: resolve the real target to its remote
    /// id. `None` means the target is outside the managed subtree and the
    /// event should be left to native handling untouched. `Some` commits the
    /// host to suppressing native propagation and performing the client
    /// upcall; the client's answer decides `preventDefault`.
    pub fn prepare_event(&self, event_type: &str, target: &B::Node) -> Option<EventNotice> {
        match self.ids.get(target) {
            Some(id) => Some(EventNotice {
                event_type: event_type.to_string(),
                target: *id,
            }),
            None => {
                trace!(
                    target: "teledom",
                    event = %event_type,
                    "real event target not managed; skipping"
                );
                None
            }
        }
    }

    /// Append the backend node behind `panel` under a host-supplied node,
    /// making the panel subtree part of the visible document.
    pub fn mount(&mut self, panel: RemoteId, host: &B::Node) -> Result<(), ServerError> {
        let node = self.resolve(panel)?.clone();
        self.backend.append_child(host, &node)?;
        Ok(())
    }

    fn cache(&mut self, id: RemoteId, node: B::Node) {
        self.ids.insert(node.clone(), id);
        self.nodes.insert(id, node);
    }

    fn resolve(&self, id: RemoteId) -> Result<&B::Node, ServerError> {
        self.nodes.get(&id).ok_or(ServerError::UnknownId(id))
    }
}
