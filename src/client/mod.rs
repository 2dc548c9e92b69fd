//! Client side of the remote DOM: a lightweight shadow tree mirroring the
//! real DOM that lives on the other end of the message channel.

pub mod event;
pub mod markup;
mod node;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;
use tracing::trace;

use crate::protocol::{
    ChannelError, CommandReply, DomCommand, EventNotice, LayoutMetric, MessageChannel, RemoteId,
    ScrollAxis,
};

pub use self::event::{DomEvent, ListenerFn, ListenerId};
pub use self::markup::MarkupError;
pub use self::node::{NodeKind, ParentLink};

use self::event::ListenerEntry;
use self::node::{ClassListState, ElementState, ShadowNode, TextState};

/// Handle to any shadow node, element or text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(RemoteId);

impl NodeHandle {
    pub fn id(self) -> RemoteId {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(RemoteId);

impl ElementHandle {
    pub fn id(self) -> RemoteId {
        self.0
    }

    pub fn as_node(self) -> NodeHandle {
        NodeHandle(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextHandle(RemoteId);

impl TextHandle {
    pub fn as_node(self) -> NodeHandle {
        NodeHandle(self.0)
    }
}

/// Handle to a document fragment. Fragments are client-only: they never get a
/// remote id and are exploded into their member list on insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentHandle(u32);

impl From<ElementHandle> for NodeHandle {
    fn from(el: ElementHandle) -> Self {
        NodeHandle(el.0)
    }
}

impl From<TextHandle> for NodeHandle {
    fn from(text: TextHandle) -> Self {
        NodeHandle(text.0)
    }
}

/// Argument to the insertion methods: a single node, or a fragment whose
/// members are inserted in order.
#[derive(Debug, Clone, Copy)]
pub enum ChildSource {
    Node(NodeHandle),
    Fragment(FragmentHandle),
}

impl From<NodeHandle> for ChildSource {
    fn from(node: NodeHandle) -> Self {
        ChildSource::Node(node)
    }
}

impl From<ElementHandle> for ChildSource {
    fn from(el: ElementHandle) -> Self {
        ChildSource::Node(el.into())
    }
}

impl From<TextHandle> for ChildSource {
    fn from(text: TextHandle) -> Self {
        ChildSource::Node(text.into())
    }
}

impl From<FragmentHandle> for ChildSource {
    fn from(frag: FragmentHandle) -> Self {
        ChildSource::Fragment(frag)
    }
}

#[derive(Debug, Error)]
pub enum DomError {
    #[error("used a removed node")]
    StaleNode,
    #[error("tried to reinsert a removed node, not supported")]
    Reinsertion,
    #[error("node is not a child of the given parent")]
    NotAChild,
    #[error("insertion reference is not a child of the parent")]
    BeforeNotAChild,
    #[error("node is not an element")]
    NotAnElement,
    #[error("node is not a text node")]
    NotAText,
    #[error("can't get text content of a node with children")]
    MixedContent,
    #[error("used an unknown document fragment")]
    StaleFragment,
    #[error("node not in its parent's child list")]
    CorruptTree,
    #[error("invalid selector")]
    InvalidSelector,
    #[error("unexpected reply to {command}")]
    UnexpectedReply { command: &'static str },
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// One client connection: the id allocator, the shadow-node registry and the
/// event dispatcher, all owned here rather than in process-wide state so
/// independent connections can coexist.
///
/// Every mutation follows the same two-phase contract: validate
/// preconditions, send the message to the server, then apply the equivalent
/// change to the shadow structures. Client and server stay synchronized by
/// that send-then-apply ordering alone; there is no reconciliation pass.
pub struct RemoteDom {
    channel: Box<dyn MessageChannel>,
    nodes: HashMap<RemoteId, ShadowNode>,
    fragments: HashMap<u32, Vec<NodeHandle>>,
    next_id: RemoteId,
    next_fragment: u32,
    next_listener: u64,
}

impl RemoteDom {
    pub fn new(channel: Box<dyn MessageChannel>) -> Self {
        RemoteDom {
            channel,
            nodes: HashMap::new(),
            fragments: HashMap::new(),
            next_id: RemoteId::FIRST,
            next_fragment: 0,
            next_listener: 0,
        }
    }

    // ---- creation ----------------------------------------------------------

    pub fn create_element(&mut self, tag_name: &str) -> Result<ElementHandle, DomError> {
        let state = ElementState::new(tag_name);
        let command = DomCommand::CreateAndCacheElement {
            tag_name: state.tag_name.clone(),
        };
        let id = self.allocate_id();
        self.channel.send(id, command)?;
        self.nodes.insert(id, ShadowNode::Element(Box::new(state)));
        Ok(ElementHandle(id))
    }

    pub fn create_text_node(&mut self, text: &str) -> Result<TextHandle, DomError> {
        let id = self.allocate_id();
        self.channel.send(
            id,
            DomCommand::CreateAndCacheTextNode {
                text: text.to_string(),
            },
        )?;
        self.nodes.insert(
            id,
            ShadowNode::Text(TextState {
                data: text.to_string(),
                parent: ParentLink::Detached,
            }),
        );
        Ok(TextHandle(id))
    }

    pub fn create_fragment(&mut self) -> FragmentHandle {
        self.next_fragment += 1;
        self.fragments.insert(self.next_fragment, Vec::new());
        FragmentHandle(self.next_fragment)
    }

    /// Whether the handle still refers to a live node. Removing a node from
    /// the tree destroys its id permanently; ids are never reused.
    pub fn is_live(&self, node: impl Into<NodeHandle>) -> bool {
        self.nodes.contains_key(&node.into().0)
    }

    /// Downcast to an element handle when the node is a live element.
    pub fn as_element(&self, node: NodeHandle) -> Option<ElementHandle> {
        match self.nodes.get(&node.0) {
            Some(ShadowNode::Element(_)) => Some(ElementHandle(node.0)),
            _ => None,
        }
    }

    /// Downcast to a text handle when the node is a live text node.
    pub fn as_text(&self, node: NodeHandle) -> Option<TextHandle> {
        match self.nodes.get(&node.0) {
            Some(ShadowNode::Text(_)) => Some(TextHandle(node.0)),
            _ => None,
        }
    }

    // ---- structural mutation ----------------------------------------------

    pub fn append_child(
        &mut self,
        parent: ElementHandle,
        child: impl Into<ChildSource>,
    ) -> Result<(), DomError> {
        match child.into() {
            ChildSource::Fragment(frag) => {
                for node in self.drain_fragment(frag)? {
                    self.append_node(parent, node)?;
                }
                Ok(())
            }
            ChildSource::Node(node) => self.append_node(parent, node),
        }
    }

    pub fn insert_before(
        &mut self,
        parent: ElementHandle,
        child: impl Into<ChildSource>,
        before: Option<NodeHandle>,
    ) -> Result<(), DomError> {
        let state = self.element(parent)?;
        let before_pos = match before {
            Some(b) => state
                .children
                .iter()
                .rposition(|c| *c == b.0)
                .ok_or(DomError::BeforeNotAChild)?,
            None => state.children.len(),
        };

        let list = match child.into() {
            ChildSource::Fragment(frag) => self.drain_fragment(frag)?,
            ChildSource::Node(node) => vec![node],
        };
        for node in &list {
            if !self.nodes.contains_key(&node.0) {
                return Err(DomError::Reinsertion);
            }
        }

        for node in &list {
            self.send_to(
                parent.0,
                DomCommand::InsertBefore {
                    child: node.0,
                    before: before.map(|b| b.0),
                },
            )?;
            self.silent_remove(node.0)?;
            if let Some(shadow) = self.nodes.get_mut(&node.0) {
                shadow.set_parent(ParentLink::Element(parent.0));
            }
        }
        if let Some(state) = self.element_state_mut(parent.0) {
            let at = before_pos.min(state.children.len());
            state.children.splice(at..at, list.iter().map(|n| n.0));
        }
        Ok(())
    }

    /// Removes `child` from `parent` and destroys its whole subtree: every
    /// descendant's id is deallocated and the server drops its cache entries.
    /// The handles stay around but answer [`DomError::StaleNode`] forever.
    pub fn remove_child(
        &mut self,
        parent: ElementHandle,
        child: impl Into<NodeHandle>,
    ) -> Result<(), DomError> {
        let child = child.into();
        let child_parent = self
            .nodes
            .get(&child.0)
            .ok_or(DomError::StaleNode)?
            .parent();
        if child_parent != ParentLink::Element(parent.0) {
            return Err(DomError::NotAChild);
        }

        self.send_to(parent.0, DomCommand::RemoveChild { child: child.0 })?;

        let mut subtree = Vec::new();
        self.collect_subtree(child.0, &mut subtree);
        for id in &subtree {
            self.send_to(*id, DomCommand::RemoveNodeFromCache)?;
        }

        let state = self
            .element_state_mut(parent.0)
            .ok_or(DomError::CorruptTree)?;
        let ind = state
            .children
            .iter()
            .rposition(|c| *c == child.0)
            .ok_or(DomError::CorruptTree)?;
        state.children.remove(ind);
        for id in subtree {
            self.nodes.remove(&id);
        }
        Ok(())
    }

    pub fn replace_child(
        &mut self,
        parent: ElementHandle,
        new: impl Into<ChildSource>,
        old: NodeHandle,
    ) -> Result<(), DomError> {
        let old_parent = self.nodes.get(&old.0).ok_or(DomError::StaleNode)?.parent();
        if old_parent != ParentLink::Element(parent.0) {
            return Err(DomError::NotAChild);
        }
        let new = new.into();
        if let ChildSource::Node(n) = new {
            if n == old {
                return Ok(());
            }
        }
        self.insert_before(parent, new, Some(old))?;
        self.remove_child(parent, old)
    }

    /// Make `el` a direct child of the document. Used for the panel root so
    /// its subtree keeps the document as the terminal event parent.
    pub fn attach_to_document(&mut self, el: ElementHandle) -> Result<(), DomError> {
        self.silent_remove(el.0)?;
        self.nodes
            .get_mut(&el.0)
            .ok_or(DomError::StaleNode)?
            .set_parent(ParentLink::Document);
        Ok(())
    }

    // ---- fragments ---------------------------------------------------------

    /// Moves `node` into the fragment, silently detaching it from any tree
    /// position it currently occupies.
    pub fn fragment_append(
        &mut self,
        frag: FragmentHandle,
        node: impl Into<NodeHandle>,
    ) -> Result<(), DomError> {
        let node = node.into();
        if !self.fragments.contains_key(&frag.0) {
            return Err(DomError::StaleFragment);
        }
        if !self.nodes.contains_key(&node.0) {
            return Err(DomError::StaleNode);
        }
        self.silent_remove(node.0)?;
        if let Some(list) = self.fragments.get_mut(&frag.0) {
            list.push(node);
        }
        Ok(())
    }

    pub fn fragment_nodes(&self, frag: FragmentHandle) -> Result<Vec<NodeHandle>, DomError> {
        self.fragments
            .get(&frag.0)
            .cloned()
            .ok_or(DomError::StaleFragment)
    }

    pub fn fragment_first_child(&self, frag: FragmentHandle) -> Result<Option<NodeHandle>, DomError> {
        Ok(self.fragment_nodes(frag)?.first().copied())
    }

    pub fn fragment_last_child(&self, frag: FragmentHandle) -> Result<Option<NodeHandle>, DomError> {
        Ok(self.fragment_nodes(frag)?.last().copied())
    }

    // ---- attributes and classes -------------------------------------------

    pub fn set_attribute(
        &mut self,
        el: ElementHandle,
        name: &str,
        value: &str,
    ) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(
            el.0,
            DomCommand::SetAttribute {
                name: name.to_string(),
                value: value.to_string(),
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            if name == "class" {
                state.class_list = Some(ClassListState::from_attribute(value));
            } else {
                state.attrs.insert(name.to_string(), value.to_string());
            }
        }
        if name == "value" {
            // keep the form-control property in sync with the attribute
            self.set_value(el, value)?;
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, el: ElementHandle, name: &str) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(
            el.0,
            DomCommand::RemoveAttribute {
                name: name.to_string(),
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            if name == "class" {
                state.class_list = None;
            } else {
                state.attrs.remove(name);
            }
        }
        Ok(())
    }

    /// Local read; the class attribute is answered from the class-list view.
    pub fn get_attribute(&self, el: ElementHandle, name: &str) -> Result<Option<String>, DomError> {
        let state = self.element(el)?;
        if name == "class" {
            Ok(state.class_list.as_ref().map(|l| l.text().to_string()))
        } else {
            Ok(state.attrs.get(name).cloned())
        }
    }

    pub fn class_name(&self, el: ElementHandle) -> Result<Option<String>, DomError> {
        self.get_attribute(el, "class")
    }

    pub fn set_class_name(&mut self, el: ElementHandle, value: &str) -> Result<(), DomError> {
        self.set_attribute(el, "class", value)
    }

    pub fn has_class(&self, el: ElementHandle, class: &str) -> Result<bool, DomError> {
        let state = self.element(el)?;
        Ok(state
            .class_list
            .as_ref()
            .is_some_and(|l| l.contains(class)))
    }

    pub fn add_class(&mut self, el: ElementHandle, class: &str) -> Result<(), DomError> {
        let state = self.element(el)?;
        let mut list = state.class_list.clone().unwrap_or_default();
        if !list.add(class) {
            return Ok(());
        }
        let text = list.text().to_string();
        self.send_to(
            el.0,
            DomCommand::SetAttribute {
                name: "class".to_string(),
                value: text,
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            state.class_list = Some(list);
        }
        Ok(())
    }

    pub fn remove_class(&mut self, el: ElementHandle, class: &str) -> Result<(), DomError> {
        let state = self.element(el)?;
        let Some(mut list) = state.class_list.clone() else {
            return Ok(());
        };
        if !list.remove(class) {
            return Ok(());
        }
        let text = list.text().to_string();
        self.send_to(
            el.0,
            DomCommand::SetAttribute {
                name: "class".to_string(),
                value: text,
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            state.class_list = Some(list);
        }
        Ok(())
    }

    /// Returns whether the class is present afterwards.
    pub fn toggle_class(
        &mut self,
        el: ElementHandle,
        class: &str,
        force: Option<bool>,
    ) -> Result<bool, DomError> {
        let desired = match force {
            Some(state) => state,
            None => !self.has_class(el, class)?,
        };
        if desired {
            self.add_class(el, class)?;
        } else {
            self.remove_class(el, class)?;
        }
        Ok(desired)
    }

    // ---- text, value, focus ------------------------------------------------

    /// Fails when the element has children; text and child content are
    /// mutually exclusive by construction.
    pub fn text_content(&self, el: ElementHandle) -> Result<String, DomError> {
        let state = self.element(el)?;
        if !state.children.is_empty() {
            return Err(DomError::MixedContent);
        }
        Ok(state.text.clone())
    }

    pub fn set_text_content(&mut self, el: ElementHandle, value: &str) -> Result<(), DomError> {
        let children: Vec<RemoteId> = self.element(el)?.children.clone();
        for child in children.into_iter().rev() {
            self.remove_child(el, NodeHandle(child))?;
        }
        self.send_to(
            el.0,
            DomCommand::SetTextContent {
                value: value.to_string(),
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            state.text = value.to_string();
        }
        Ok(())
    }

    /// Replaces the element's content with the parse of `markup`. The markup
    /// is parsed in full before any existing content is touched, so malformed
    /// input leaves the element as it was.
    pub fn set_inner_html(&mut self, el: ElementHandle, markup: &str) -> Result<(), DomError> {
        self.element(el)?;
        let frag = self.parse_markup(markup)?;
        self.set_text_content(el, "")?;
        self.append_child(el, frag)
    }

    pub fn value(&self, el: ElementHandle) -> Result<String, DomError> {
        Ok(self.element(el)?.value.clone())
    }

    pub fn set_value(&mut self, el: ElementHandle, value: &str) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(
            el.0,
            DomCommand::SetValue {
                value: value.to_string(),
            },
        )?;
        if let Some(state) = self.element_state_mut(el.0) {
            state.value = value.to_string();
        }
        Ok(())
    }

    pub fn text_data(&self, text: TextHandle) -> Result<String, DomError> {
        match self.nodes.get(&text.0) {
            Some(ShadowNode::Text(state)) => Ok(state.data.clone()),
            Some(ShadowNode::Element(_)) => Err(DomError::NotAText),
            None => Err(DomError::StaleNode),
        }
    }

    pub fn focus(&mut self, el: ElementHandle) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(el.0, DomCommand::Focus)?;
        Ok(())
    }

    // ---- traversal ---------------------------------------------------------

    pub fn parent_node(&self, node: impl Into<NodeHandle>) -> Result<ParentLink, DomError> {
        Ok(self
            .nodes
            .get(&node.into().0)
            .ok_or(DomError::StaleNode)?
            .parent())
    }

    pub fn child_nodes(&self, el: ElementHandle) -> Result<Vec<NodeHandle>, DomError> {
        Ok(self
            .element(el)?
            .children
            .iter()
            .map(|id| NodeHandle(*id))
            .collect())
    }

    pub fn first_child(&self, el: ElementHandle) -> Result<Option<NodeHandle>, DomError> {
        Ok(self.element(el)?.children.first().map(|id| NodeHandle(*id)))
    }

    pub fn last_child(&self, el: ElementHandle) -> Result<Option<NodeHandle>, DomError> {
        Ok(self.element(el)?.children.last().map(|id| NodeHandle(*id)))
    }

    pub fn next_sibling(&self, node: impl Into<NodeHandle>) -> Result<Option<NodeHandle>, DomError> {
        self.sibling(node.into(), 1)
    }

    pub fn previous_sibling(
        &self,
        node: impl Into<NodeHandle>,
    ) -> Result<Option<NodeHandle>, DomError> {
        self.sibling(node.into(), -1)
    }

    pub fn next_element_sibling(
        &self,
        node: impl Into<NodeHandle>,
    ) -> Result<Option<ElementHandle>, DomError> {
        self.element_sibling(node.into(), 1)
    }

    pub fn previous_element_sibling(
        &self,
        node: impl Into<NodeHandle>,
    ) -> Result<Option<ElementHandle>, DomError> {
        self.element_sibling(node.into(), -1)
    }

    pub fn tag_name(&self, el: ElementHandle) -> Result<String, DomError> {
        Ok(self.element(el)?.tag_name.clone())
    }

    pub fn local_name(&self, el: ElementHandle) -> Result<String, DomError> {
        Ok(self.element(el)?.local_name.clone())
    }

    pub fn node_kind(&self, node: impl Into<NodeHandle>) -> Result<NodeKind, DomError> {
        Ok(self
            .nodes
            .get(&node.into().0)
            .ok_or(DomError::StaleNode)?
            .kind())
    }

    /// Depth-first pre-order walk over the shadow subtree, `scope` included.
    /// Purely local, no server round trip.
    pub fn get_elements_by_tag_name(
        &self,
        scope: ElementHandle,
        tag_name: &str,
    ) -> Result<Vec<ElementHandle>, DomError> {
        self.element(scope)?;
        let tag_name = tag_name.to_uppercase();
        let mut subtree = Vec::new();
        self.collect_subtree(scope.0, &mut subtree);
        Ok(subtree
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .and_then(|n| n.as_element())
                    .is_some_and(|state| state.tag_name == tag_name)
            })
            .map(ElementHandle)
            .collect())
    }

    pub fn get_elements_by_class_name(
        &self,
        scope: ElementHandle,
        class: &str,
    ) -> Result<Vec<ElementHandle>, DomError> {
        self.element(scope)?;
        let mut subtree = Vec::new();
        self.collect_subtree(scope.0, &mut subtree);
        Ok(subtree
            .into_iter()
            .filter(|id| {
                self.nodes
                    .get(id)
                    .and_then(|n| n.as_element())
                    .and_then(|state| state.class_list.as_ref())
                    .is_some_and(|l| l.contains(class))
            })
            .map(ElementHandle)
            .collect())
    }

    // ---- server-delegated queries -----------------------------------------

    /// Always asks the real DOM engine; selector matching is not reimplemented
    /// locally. `Ok(None)` means no match, [`DomError::InvalidSelector`] means
    /// the engine rejected the selector itself.
    pub fn query_selector(
        &mut self,
        scope: ElementHandle,
        selector: &str,
    ) -> Result<Option<ElementHandle>, DomError> {
        self.element(scope)?;
        match self.send_to(
            scope.0,
            DomCommand::QuerySelector {
                selector: selector.to_string(),
            },
        )? {
            CommandReply::Match { node } => Ok(node.and_then(|id| match self.nodes.get(&id) {
                Some(ShadowNode::Element(_)) => Some(ElementHandle(id)),
                _ => None,
            })),
            CommandReply::InvalidSelector => Err(DomError::InvalidSelector),
            _ => Err(DomError::UnexpectedReply {
                command: "query_selector",
            }),
        }
    }

    pub fn query_selector_all(
        &mut self,
        scope: ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, DomError> {
        self.element(scope)?;
        match self.send_to(
            scope.0,
            DomCommand::QuerySelectorAll {
                selector: selector.to_string(),
            },
        )? {
            CommandReply::Matches { nodes } => Ok(nodes
                .into_iter()
                .filter(|id| matches!(self.nodes.get(id), Some(ShadowNode::Element(_))))
                .map(ElementHandle)
                .collect()),
            CommandReply::InvalidSelector => Err(DomError::InvalidSelector),
            _ => Err(DomError::UnexpectedReply {
                command: "query_selector_all",
            }),
        }
    }

    // ---- layout metrics ----------------------------------------------------
    // Each accessor is a synchronous round trip; layout can change outside
    // the protocol's control, so these values are never cached.

    pub fn client_width(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::ClientWidth)
    }

    pub fn client_height(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::ClientHeight)
    }

    pub fn offset_width(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::OffsetWidth)
    }

    pub fn offset_height(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::OffsetHeight)
    }

    pub fn offset_left(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::OffsetLeft)
    }

    pub fn offset_top(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::OffsetTop)
    }

    pub fn scroll_left(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::ScrollLeft)
    }

    pub fn scroll_top(&mut self, el: ElementHandle) -> Result<i32, DomError> {
        self.metric(el, LayoutMetric::ScrollTop)
    }

    pub fn set_scroll_left(&mut self, el: ElementHandle, value: i32) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(
            el.0,
            DomCommand::SetScroll {
                axis: ScrollAxis::Horizontal,
                value,
            },
        )?;
        Ok(())
    }

    pub fn set_scroll_top(&mut self, el: ElementHandle, value: i32) -> Result<(), DomError> {
        self.element(el)?;
        self.send_to(
            el.0,
            DomCommand::SetScroll {
                axis: ScrollAxis::Vertical,
                value,
            },
        )?;
        Ok(())
    }

    pub fn remote_scroll_to(
        &mut self,
        el: ElementHandle,
        scrollbox: ElementHandle,
        align_x: Option<&str>,
        align_y: Option<&str>,
        scroll_when_visible: bool,
    ) -> Result<(), DomError> {
        self.element(el)?;
        self.element(scrollbox)?;
        self.send_to(
            el.0,
            DomCommand::RemoteScrollTo {
                scrollbox: scrollbox.0,
                align_x: align_x.map(str::to_string),
                align_y: align_y.map(str::to_string),
                scroll_when_visible,
            },
        )?;
        Ok(())
    }

    // ---- event listeners ---------------------------------------------------

    /// Registers a listener and returns its removal token. The server is told
    /// to watch the event type only on the first registration for that type
    /// on this element.
    pub fn add_event_listener<F>(
        &mut self,
        el: ElementHandle,
        event_type: &str,
        capturing: bool,
        callback: F,
    ) -> Result<ListenerId, DomError>
    where
        F: FnMut(&mut RemoteDom, &mut DomEvent) -> bool + 'static,
    {
        let state = self.element(el)?;
        let first_for_type = state
            .listeners
            .get(event_type)
            .map_or(true, |entries| entries.is_empty());
        if first_for_type {
            self.send_to(
                el.0,
                DomCommand::AddListener {
                    event: event_type.to_string(),
                },
            )?;
        }
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        let callback: Rc<RefCell<ListenerFn>> = Rc::new(RefCell::new(callback));
        if let Some(state) = self.element_state_mut(el.0) {
            state
                .listeners
                .entry(event_type.to_string())
                .or_default()
                .push(ListenerEntry {
                    id,
                    capturing,
                    callback,
                });
        }
        Ok(id)
    }

    /// Silently ignores unknown tokens, mirroring DOM behaviour. The server
    /// is told to stop watching only when the last listener of the type goes.
    pub fn remove_event_listener(
        &mut self,
        el: ElementHandle,
        event_type: &str,
        id: ListenerId,
    ) -> Result<(), DomError> {
        let (present, last_of_type) = {
            let state = self.element(el)?;
            match state.listeners.get(event_type) {
                None => (false, false),
                Some(entries) => (entries.iter().any(|e| e.id == id), entries.len() == 1),
            }
        };
        if !present {
            return Ok(());
        }
        if last_of_type {
            self.send_to(
                el.0,
                DomCommand::RemoveListener {
                    event: event_type.to_string(),
                },
            )?;
        }
        if let Some(state) = self.element_state_mut(el.0) {
            if let Some(entries) = state.listeners.get_mut(event_type) {
                entries.retain(|e| e.id != id);
                if entries.is_empty() {
                    state.listeners.remove(event_type);
                }
            }
        }
        Ok(())
    }

    // ---- event dispatch ----------------------------------------------------

    /// Entry point for the server's event upcall. Walks the event-parent
    /// chain from the target, runs capturing listeners root-to-target and
    /// bubbling listeners target-to-root, and reports whether any listener
    /// asked for the default action to be prevented.
    ///
    /// A listener returning `false` stops propagation and prevents the
    /// default; `stop_propagation` halts delivery after the current listener.
    /// Remaining listeners of the same node are not skipped individually
    /// (`stop_immediate_propagation` is an accepted simplification).
    pub fn handle_event(&mut self, notice: &EventNotice) -> bool {
        let target = notice.target;
        if !self.nodes.contains_key(&target) {
            trace!(
                target: "teledom",
                id = target.get(),
                event = %notice.event_type,
                "event for unknown node ignored"
            );
            return false;
        }

        let mut capturing = Vec::new();
        let mut bubbling = Vec::new();
        let mut cursor = Some(target);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get(&id) else {
                break;
            };
            if let Some(state) = node.as_element() {
                if let Some(entries) = state.listeners.get(notice.event_type.as_str()) {
                    for entry in entries {
                        let slot = (ElementHandle(id), Rc::clone(&entry.callback));
                        if entry.capturing {
                            capturing.push(slot);
                        } else {
                            bubbling.push(slot);
                        }
                    }
                }
            }
            // chain continues through ancestors; the document and window
            // terminate it and carry no listeners of their own
            cursor = match node.parent() {
                ParentLink::Element(p) => Some(p),
                ParentLink::Document | ParentLink::Detached => None,
            };
        }
        capturing.reverse();

        let mut event = DomEvent::new(&notice.event_type, NodeHandle(target));
        for (el, callback) in capturing.into_iter().chain(bubbling) {
            event.set_current_target(el);
            let keep_going = (&mut *callback.borrow_mut())(self, &mut event);
            if !keep_going {
                event.stop_propagation();
                event.prevent_default();
            }
            if event.propagation_stopped() {
                break;
            }
        }
        event.default_prevented()
    }

    // ---- internals ---------------------------------------------------------

    fn allocate_id(&mut self) -> RemoteId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    /// Take the fragment's members, leaving it registered but empty. Insertion
    /// consumes the member list; the fragment object itself is reusable.
    fn drain_fragment(&mut self, frag: FragmentHandle) -> Result<Vec<NodeHandle>, DomError> {
        let list = self
            .fragments
            .get_mut(&frag.0)
            .ok_or(DomError::StaleFragment)?;
        Ok(std::mem::take(list))
    }

    fn send_to(&mut self, target: RemoteId, command: DomCommand) -> Result<CommandReply, DomError> {
        if !self.nodes.contains_key(&target) {
            return Err(DomError::StaleNode);
        }
        trace!(target: "teledom", id = target.get(), command = command.name(), "send");
        Ok(self.channel.send(target, command)?)
    }

    fn element(&self, el: ElementHandle) -> Result<&ElementState, DomError> {
        match self.nodes.get(&el.0) {
            Some(ShadowNode::Element(state)) => Ok(state),
            Some(ShadowNode::Text(_)) => Err(DomError::NotAnElement),
            None => Err(DomError::StaleNode),
        }
    }

    fn element_state_mut(&mut self, id: RemoteId) -> Option<&mut ElementState> {
        self.nodes.get_mut(&id).and_then(|n| n.as_element_mut())
    }

    fn append_node(&mut self, parent: ElementHandle, child: NodeHandle) -> Result<(), DomError> {
        if !self.nodes.contains_key(&child.0) {
            return Err(DomError::Reinsertion);
        }
        self.element(parent)?;
        self.send_to(parent.0, DomCommand::AppendChild { child: child.0 })?;
        self.silent_remove(child.0)?;
        if let Some(state) = self.element_state_mut(parent.0) {
            state.children.push(child.0);
        }
        if let Some(shadow) = self.nodes.get_mut(&child.0) {
            shadow.set_parent(ParentLink::Element(parent.0));
        }
        Ok(())
    }

    /// Detach a node from its current parent without telling the server;
    /// every caller has either already sent the matching message or is about
    /// to move the node somewhere else in the same operation.
    fn silent_remove(&mut self, node: RemoteId) -> Result<(), DomError> {
        let parent = self.nodes.get(&node).ok_or(DomError::StaleNode)?.parent();
        let ParentLink::Element(parent_id) = parent else {
            return Ok(());
        };
        let state = self
            .element_state_mut(parent_id)
            .ok_or(DomError::CorruptTree)?;
        let ind = state
            .children
            .iter()
            .rposition(|c| *c == node)
            .ok_or(DomError::CorruptTree)?;
        state.children.remove(ind);
        if let Some(shadow) = self.nodes.get_mut(&node) {
            shadow.set_parent(ParentLink::Detached);
        }
        Ok(())
    }

    fn collect_subtree(&self, id: RemoteId, out: &mut Vec<RemoteId>) {
        out.push(id);
        if let Some(state) = self.nodes.get(&id).and_then(|n| n.as_element()) {
            for child in &state.children {
                self.collect_subtree(*child, out);
            }
        }
    }

    fn sibling(&self, node: NodeHandle, offset: isize) -> Result<Option<NodeHandle>, DomError> {
        let parent = self.nodes.get(&node.0).ok_or(DomError::StaleNode)?.parent();
        let ParentLink::Element(parent_id) = parent else {
            return Ok(None);
        };
        let state = self
            .nodes
            .get(&parent_id)
            .and_then(|n| n.as_element())
            .ok_or(DomError::CorruptTree)?;
        let ind = state
            .children
            .iter()
            .position(|c| *c == node.0)
            .ok_or(DomError::CorruptTree)?;
        let ind = ind as isize + offset;
        if ind < 0 {
            return Ok(None);
        }
        Ok(state.children.get(ind as usize).map(|id| NodeHandle(*id)))
    }

    fn element_sibling(
        &self,
        node: NodeHandle,
        offset: isize,
    ) -> Result<Option<ElementHandle>, DomError> {
        let mut cursor = self.sibling(node, offset)?;
        while let Some(n) = cursor {
            if matches!(self.nodes.get(&n.0), Some(ShadowNode::Element(_))) {
                return Ok(Some(ElementHandle(n.0)));
            }
            cursor = self.sibling(n, offset)?;
        }
        Ok(None)
    }

    fn metric(&mut self, el: ElementHandle, metric: LayoutMetric) -> Result<i32, DomError> {
        self.element(el)?;
        match self.send_to(el.0, DomCommand::GetMetric { metric })? {
            CommandReply::Metric { value } => Ok(value),
            _ => Err(DomError::UnexpectedReply {
                command: "get_metric",
            }),
        }
    }
}
