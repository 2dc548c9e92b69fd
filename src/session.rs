//! In-process wiring of one client to one server.
//!
//! The two sides normally sit in different processes with a privileged
//! synchronous channel between them; [`PanelSession`] provides the same
//! call-and-return discipline inside a single process, which is what tests
//! and headless automation use.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context as AnyhowContext, Result};
use tracing::debug;

use crate::client::{ElementHandle, RemoteDom};
use crate::protocol::{ChannelError, CommandReply, DomCommand, MessageChannel, RemoteId};
use crate::server::{DomBackend, EventDisposition, RemoteDomServer};

/// Client-side channel that hands commands straight to an in-process server.
struct LocalChannel<B: DomBackend> {
    server: Rc<RefCell<RemoteDomServer<B>>>,
}

impl<B: DomBackend> MessageChannel for LocalChannel<B> {
    fn send(&mut self, target: RemoteId, command: DomCommand) -> Result<CommandReply, ChannelError> {
        let mut server = self.server.try_borrow_mut().map_err(|_| ChannelError::Busy)?;
        server
            .handle_message(target, command)
            .map_err(|err| ChannelError::Remote(err.to_string()))
    }
}

/// One connected client/server pair sharing a backend.
///
/// Event flow is the nested synchronous sequence the protocol requires: the
/// server resolves the real target (`prepare_event`), the client runs
/// shadow-tree dispatch while the server is *not* borrowed — so listeners are
/// free to issue further commands — and the resulting disposition tells the
/// host what to do with the real event.
pub struct PanelSession<B: DomBackend> {
    dom: RemoteDom,
    server: Rc<RefCell<RemoteDomServer<B>>>,
}

impl<B: DomBackend + 'static> PanelSession<B> {
    pub fn connect(backend: B) -> Self {
        let server = Rc::new(RefCell::new(RemoteDomServer::new(backend)));
        let channel = LocalChannel {
            server: Rc::clone(&server),
        };
        let dom = RemoteDom::new(Box::new(channel));
        debug!(target: "teledom", "panel session connected");
        PanelSession { dom, server }
    }

    pub fn dom(&mut self) -> &mut RemoteDom {
        &mut self.dom
    }

    /// Creates the root element UI code renders into. Its shadow parent is
    /// the document, so detached-feeling subtrees still terminate their
    /// event chain correctly.
    pub fn create_panel_node(&mut self) -> Result<ElementHandle> {
        let el = self
            .dom
            .create_element("div")
            .context("failed to create panel root")?;
        self.dom
            .attach_to_document(el)
            .context("failed to adopt panel root")?;
        Ok(el)
    }

    /// Appends the backend node behind `panel` under a host-supplied node,
    /// making the panel visible in the real document.
    pub fn mount_panel(&mut self, panel: ElementHandle, host: &B::Node) -> Result<()> {
        self.server
            .borrow_mut()
            .mount(panel.as_node().id(), host)
            .context("failed to mount panel node")
    }

    /// Offer a real DOM event to the session. Must complete before the host
    /// resumes native handling of the event, because the return value carries
    /// the propagation/default decisions.
    pub fn deliver_event(&mut self, event_type: &str, target: &B::Node) -> EventDisposition {
        let notice = self.server.borrow().prepare_event(event_type, target);
        match notice {
            None => EventDisposition::Unmanaged,
            Some(notice) => {
                let default_prevented = self.dom.handle_event(&notice);
                EventDisposition::Handled { default_prevented }
            }
        }
    }

    pub fn with_backend<T>(&self, f: impl FnOnce(&B) -> T) -> T {
        f(self.server.borrow().backend())
    }

    pub fn with_backend_mut<T>(&mut self, f: impl FnOnce(&mut B) -> T) -> T {
        f(self.server.borrow_mut().backend_mut())
    }

    /// Remote id of the backend node, when it is managed by this session.
    pub fn id_of(&self, node: &B::Node) -> Option<RemoteId> {
        self.server.borrow().id_for(node)
    }

    /// Backend node behind a shadow element, when it is still live.
    pub fn backend_node(&self, el: ElementHandle) -> Option<B::Node> {
        self.server.borrow().node_for(el.id()).cloned()
    }
}
