use std::collections::HashMap;

use crate::client::event::ListenerEntry;
use crate::protocol::RemoteId;

/// Where a shadow node currently sits in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentLink {
    /// Not attached anywhere. For event purposes the node falls back to the
    /// owning document.
    Detached,
    /// Directly under the document; only the panel root lives here.
    Document,
    Element(RemoteId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
}

/// Client-side shadow of one server node.
pub(crate) enum ShadowNode {
    Text(TextState),
    Element(Box<ElementState>),
}

impl ShadowNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            ShadowNode::Text(_) => NodeKind::Text,
            ShadowNode::Element(_) => NodeKind::Element,
        }
    }

    pub fn parent(&self) -> ParentLink {
        match self {
            ShadowNode::Text(t) => t.parent,
            ShadowNode::Element(e) => e.parent,
        }
    }

    pub fn set_parent(&mut self, parent: ParentLink) {
        match self {
            ShadowNode::Text(t) => t.parent = parent,
            ShadowNode::Element(e) => e.parent = parent,
        }
    }

    pub fn as_element(&self) -> Option<&ElementState> {
        match self {
            ShadowNode::Element(e) => Some(e),
            ShadowNode::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut ElementState> {
        match self {
            ShadowNode::Element(e) => Some(e),
            ShadowNode::Text(_) => None,
        }
    }
}

pub(crate) struct TextState {
    pub data: String,
    pub parent: ParentLink,
}

pub(crate) struct ElementState {
    /// Canonical upper-case name, what `getElementsByTagName` matches on.
    pub tag_name: String,
    pub local_name: String,
    pub attrs: HashMap<String, String>,
    pub children: Vec<RemoteId>,
    /// event type -> ordered registrations. Order within a type is
    /// registration order; the dispatch walk decides phase ordering.
    pub listeners: HashMap<String, Vec<ListenerEntry>>,
    /// `None` until a class attribute has ever been set, mirroring the
    /// distinction between a missing attribute and an empty one.
    pub class_list: Option<ClassListState>,
    /// Text mirror, only meaningful while the element has no children.
    pub text: String,
    /// Mirror of the form-control value property.
    pub value: String,
    pub parent: ParentLink,
}

impl ElementState {
    pub fn new(tag_name: &str) -> Self {
        ElementState {
            tag_name: tag_name.to_uppercase(),
            local_name: tag_name.to_lowercase(),
            attrs: HashMap::new(),
            children: Vec::new(),
            listeners: HashMap::new(),
            class_list: None,
            text: String::new(),
            value: String::new(),
            parent: ParentLink::Detached,
        }
    }
}

/// Ordered token view over the class attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ClassListState {
    tokens: Vec<String>,
    text: String,
}

impl ClassListState {
    /// Rebuild from a raw attribute value, keeping the raw text verbatim.
    pub fn from_attribute(value: &str) -> Self {
        let mut tokens = Vec::new();
        for part in value.split(' ') {
            if !part.is_empty() && !tokens.iter().any(|t| t == part) {
                tokens.push(part.to_string());
            }
        }
        ClassListState {
            tokens,
            text: value.to_string(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn contains(&self, class: &str) -> bool {
        self.tokens.iter().any(|t| t == class)
    }

    /// Returns false when the class was already present.
    pub fn add(&mut self, class: &str) -> bool {
        if self.contains(class) {
            return false;
        }
        self.tokens.push(class.to_string());
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(class);
        true
    }

    /// Returns false when the class was not present.
    pub fn remove(&mut self, class: &str) -> bool {
        let before = self.tokens.len();
        self.tokens.retain(|t| t != class);
        if self.tokens.len() == before {
            return false;
        }
        self.text = self.tokens.join(" ");
        true
    }
}
