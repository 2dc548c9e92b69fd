use std::cell::RefCell;
use std::rc::Rc;

use crate::client::{ElementHandle, NodeHandle, RemoteDom};

/// Callback invoked for a listener during shadow-tree dispatch. Returning
/// `false` stops propagation and marks the default action prevented, matching
/// the convention of legacy DOM level-0 handlers.
pub type ListenerFn = dyn FnMut(&mut RemoteDom, &mut DomEvent) -> bool;

/// Token identifying one listener registration, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub(crate) struct ListenerEntry {
    pub id: ListenerId,
    pub capturing: bool,
    pub callback: Rc<RefCell<ListenerFn>>,
}

/// Synthetic event delivered to shadow-tree listeners.
///
/// Built by the client when the server forwards a real DOM event. Carries
/// just enough state for the capture/bubble walk and the cancellation
/// decision; `stop_immediate_propagation` is deliberately not modelled.
pub struct DomEvent {
    event_type: String,
    target: NodeHandle,
    current_target: Option<ElementHandle>,
    propagation_stopped: bool,
    default_prevented: bool,
}

impl DomEvent {
    pub(crate) fn new(event_type: &str, target: NodeHandle) -> Self {
        DomEvent {
            event_type: event_type.to_string(),
            target,
            current_target: None,
            propagation_stopped: false,
            default_prevented: false,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The node the real event fired on.
    pub fn target(&self) -> NodeHandle {
        self.target
    }

    /// The element whose listener is currently being invoked.
    pub fn current_target(&self) -> Option<ElementHandle> {
        self.current_target
    }

    pub(crate) fn set_current_target(&mut self, el: ElementHandle) {
        self.current_target = Some(el);
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}
