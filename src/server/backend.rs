use std::fmt::Debug;
use std::hash::Hash;

use thiserror::Error;

use crate::protocol::{LayoutMetric, ScrollAxis};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown backend node")]
    UnknownNode,
    #[error("node is not a child of the given parent")]
    NotAChild,
    #[error("operation requires an element node")]
    NotAnElement,
    #[error("{0}")]
    Other(String),
}

/// Selector syntax the engine rejected. Distinct from [`BackendError`]
/// because a bad selector is a normal failure the client is told about, not
/// a sign of protocol corruption.
#[derive(Debug, Error)]
#[error("invalid selector: {selector}")]
pub struct SelectorError {
    pub selector: String,
}

/// The real DOM the server proxies for, reduced to the operations the
/// protocol needs. Nodes are opaque tokens; the server never inspects them
/// beyond identity, which is what lets any DOM-shaped tree sit behind it.
///
/// `watch_events` / `unwatch_events` install and tear down the backend's
/// native listener for an event type. The server calls them only on 0→1 and
/// 1→0 transitions of its per-(node, type) reference count, so a backend can
/// treat them as idempotent install/remove.
pub trait DomBackend {
    type Node: Clone + Eq + Hash + Debug;

    fn create_element(&mut self, tag_name: &str) -> Self::Node;
    fn create_text_node(&mut self, text: &str) -> Self::Node;

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node)
        -> Result<(), BackendError>;
    fn insert_before(
        &mut self,
        parent: &Self::Node,
        child: &Self::Node,
        before: Option<&Self::Node>,
    ) -> Result<(), BackendError>;
    fn remove_child(&mut self, parent: &Self::Node, child: &Self::Node)
        -> Result<(), BackendError>;

    fn set_attribute(
        &mut self,
        node: &Self::Node,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError>;
    fn remove_attribute(&mut self, node: &Self::Node, name: &str) -> Result<(), BackendError>;

    fn focus(&mut self, node: &Self::Node) -> Result<(), BackendError>;
    fn set_text_content(&mut self, node: &Self::Node, value: &str) -> Result<(), BackendError>;
    fn set_value(&mut self, node: &Self::Node, value: &str) -> Result<(), BackendError>;

    fn query_selector(
        &mut self,
        scope: &Self::Node,
        selector: &str,
    ) -> Result<Option<Self::Node>, SelectorError>;
    fn query_selector_all(
        &mut self,
        scope: &Self::Node,
        selector: &str,
    ) -> Result<Vec<Self::Node>, SelectorError>;

    fn metric(&mut self, node: &Self::Node, metric: LayoutMetric) -> Result<i32, BackendError>;
    fn set_scroll(
        &mut self,
        node: &Self::Node,
        axis: ScrollAxis,
        value: i32,
    ) -> Result<(), BackendError>;
    fn scroll_to(
        &mut self,
        node: &Self::Node,
        scrollbox: &Self::Node,
        align_x: Option<&str>,
        align_y: Option<&str>,
        scroll_when_visible: bool,
    ) -> Result<(), BackendError>;

    fn watch_events(&mut self, node: &Self::Node, event_type: &str) -> Result<(), BackendError>;
    fn unwatch_events(&mut self, node: &Self::Node, event_type: &str) -> Result<(), BackendError>;
}
