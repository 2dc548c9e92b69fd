//! In-memory [`DomBackend`] with no rendering attached. Stands in for the
//! real DOM in tests and headless automation: a plain arena tree with
//! attributes, focus, settable layout metrics, listener-watch bookkeeping and
//! a small selector engine covering the selectors panel templates use.

use std::collections::{HashMap, HashSet};

use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::protocol::{LayoutMetric, ScrollAxis};
use crate::server::backend::{BackendError, DomBackend, SelectorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessNode(usize);

/// Recorded `remote_scroll_to` request, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollRequest {
    pub target: HeadlessNode,
    pub scrollbox: HeadlessNode,
    pub align_x: Option<String>,
    pub align_y: Option<String>,
    pub scroll_when_visible: bool,
}

enum NodeData {
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        value: String,
        metrics: HashMap<LayoutMetric, i32>,
        watched: HashSet<String>,
    },
    Text {
        data: String,
    },
}

struct Slot {
    data: NodeData,
    parent: Option<usize>,
    children: Vec<usize>,
}

pub struct HeadlessDom {
    nodes: Vec<Slot>,
    focused: Option<usize>,
    last_scroll_to: Option<ScrollRequest>,
}

impl Default for HeadlessDom {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDom {
    pub fn new() -> Self {
        HeadlessDom {
            nodes: vec![Slot {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
            focused: None,
            last_scroll_to: None,
        }
    }

    /// The document node; mount panels under this (or any element).
    pub fn document(&self) -> HeadlessNode {
        HeadlessNode(0)
    }

    pub fn tag(&self, node: HeadlessNode) -> Option<&str> {
        match &self.nodes.get(node.0)?.data {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, node: HeadlessNode, name: &str) -> Option<&str> {
        match &self.nodes.get(node.0)?.data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn children(&self, node: HeadlessNode) -> Vec<HeadlessNode> {
        self.nodes
            .get(node.0)
            .map(|slot| slot.children.iter().map(|id| HeadlessNode(*id)).collect())
            .unwrap_or_default()
    }

    pub fn parent(&self, node: HeadlessNode) -> Option<HeadlessNode> {
        self.nodes.get(node.0)?.parent.map(HeadlessNode)
    }

    pub fn node_value(&self, node: HeadlessNode) -> Option<&str> {
        match &self.nodes.get(node.0)?.data {
            NodeData::Element { value, .. } => Some(value),
            NodeData::Text { data } => Some(data),
            NodeData::Document => None,
        }
    }

    /// Concatenated text of the subtree, like the DOM property.
    pub fn text_content(&self, node: HeadlessNode) -> String {
        let mut out = String::new();
        self.collect_text(node.0, &mut out);
        out
    }

    pub fn focused(&self) -> Option<HeadlessNode> {
        self.focused.map(HeadlessNode)
    }

    pub fn is_watching(&self, node: HeadlessNode, event_type: &str) -> bool {
        match self.nodes.get(node.0).map(|slot| &slot.data) {
            Some(NodeData::Element { watched, .. }) => watched.contains(event_type),
            _ => false,
        }
    }

    pub fn last_scroll_to(&self) -> Option<&ScrollRequest> {
        self.last_scroll_to.as_ref()
    }

    /// Tests configure layout answers here; there is no layout engine.
    pub fn set_metric(&mut self, node: HeadlessNode, metric: LayoutMetric, value: i32) {
        if let Some(Slot {
            data: NodeData::Element { metrics, .. },
            ..
        }) = self.nodes.get_mut(node.0)
        {
            metrics.insert(metric, value);
        }
    }

    pub fn outer_html(&self, node: HeadlessNode) -> String {
        let mut out = String::new();
        self.serialize_node(node.0, &mut out);
        out
    }

    pub fn inner_html(&self, node: HeadlessNode) -> String {
        let mut out = String::new();
        self.serialize_children(node.0, &mut out);
        out
    }

    fn serialize_children(&self, id: usize, out: &mut String) {
        if let Some(slot) = self.nodes.get(id) {
            for child in &slot.children {
                self.serialize_node(*child, out);
            }
        }
    }

    fn serialize_node(&self, id: usize, out: &mut String) {
        let Some(slot) = self.nodes.get(id) else {
            return;
        };
        match &slot.data {
            NodeData::Document => self.serialize_children(id, out),
            NodeData::Element { tag, attrs, .. } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&encode_double_quoted_attribute(value));
                    out.push('"');
                }
                out.push('>');
                self.serialize_children(id, out);
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            NodeData::Text { data } => {
                out.push_str(&encode_text(data));
            }
        }
    }

    fn collect_text(&self, id: usize, out: &mut String) {
        if let Some(slot) = self.nodes.get(id) {
            if let NodeData::Text { data } = &slot.data {
                out.push_str(data);
            }
            for child in &slot.children {
                self.collect_text(*child, out);
            }
        }
    }

    fn push(&mut self, data: NodeData) -> HeadlessNode {
        self.nodes.push(Slot {
            data,
            parent: None,
            children: Vec::new(),
        });
        HeadlessNode(self.nodes.len() - 1)
    }

    fn slot(&self, node: &HeadlessNode) -> Result<&Slot, BackendError> {
        self.nodes.get(node.0).ok_or(BackendError::UnknownNode)
    }

    fn element_mut(
        &mut self,
        node: &HeadlessNode,
    ) -> Result<(&mut Vec<(String, String)>, &mut String, &mut HashSet<String>), BackendError>
    {
        match self.nodes.get_mut(node.0).map(|slot| &mut slot.data) {
            Some(NodeData::Element {
                attrs,
                value,
                watched,
                ..
            }) => Ok((attrs, value, watched)),
            Some(_) => Err(BackendError::NotAnElement),
            None => Err(BackendError::UnknownNode),
        }
    }

    fn detach(&mut self, id: usize) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|c| *c != id);
        }
    }

    fn attach(&mut self, parent: usize, child: usize, at: Option<usize>) {
        match at {
            Some(index) => self.nodes[parent].children.insert(index, child),
            None => self.nodes[parent].children.push(child),
        }
        self.nodes[child].parent = Some(parent);
    }

    fn matches_compound(&self, id: usize, compound: &CompoundSelector) -> bool {
        let NodeData::Element { tag, attrs, .. } = &self.nodes[id].data else {
            return false;
        };
        if let Some(want) = &compound.tag {
            if tag != want {
                return false;
            }
        }
        if let Some(want) = &compound.id {
            let found = attrs.iter().find(|(n, _)| n == "id").map(|(_, v)| v);
            if found.map(String::as_str) != Some(want.as_str()) {
                return false;
            }
        }
        if !compound.classes.is_empty() {
            let class_attr = attrs
                .iter()
                .find(|(n, _)| n == "class")
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            let present: Vec<&str> = class_attr.split_whitespace().collect();
            if !compound.classes.iter().all(|c| present.contains(&c.as_str())) {
                return false;
            }
        }
        true
    }

    fn matches_chain(&self, id: usize, compounds: &[CompoundSelector]) -> bool {
        let Some((last, ancestors)) = compounds.split_last() else {
            return false;
        };
        if !self.matches_compound(id, last) {
            return false;
        }
        let mut remaining = ancestors;
        let mut cursor = self.nodes[id].parent;
        while let Some(parent) = cursor {
            if remaining.is_empty() {
                break;
            }
            if let Some((head, rest)) = remaining.split_last() {
                if self.matches_compound(parent, head) {
                    remaining = rest;
                }
            }
            cursor = self.nodes[parent].parent;
        }
        remaining.is_empty()
    }

    /// Pre-order walk over descendants of `scope` (scope excluded, like the
    /// real `querySelector`), collecting matches until `limit`.
    fn select(
        &self,
        scope: usize,
        compounds: &[CompoundSelector],
        limit: usize,
        out: &mut Vec<HeadlessNode>,
    ) {
        for child in &self.nodes[scope].children {
            if out.len() >= limit {
                return;
            }
            if self.matches_chain(*child, compounds) {
                out.push(HeadlessNode(*child));
            }
            self.select(*child, compounds, limit, out);
        }
    }
}

impl DomBackend for HeadlessDom {
    type Node = HeadlessNode;

    fn create_element(&mut self, tag_name: &str) -> HeadlessNode {
        self.push(NodeData::Element {
            tag: tag_name.to_lowercase(),
            attrs: Vec::new(),
            value: String::new(),
            metrics: HashMap::new(),
            watched: HashSet::new(),
        })
    }

    fn create_text_node(&mut self, text: &str) -> HeadlessNode {
        self.push(NodeData::Text {
            data: text.to_string(),
        })
    }

    fn append_child(
        &mut self,
        parent: &HeadlessNode,
        child: &HeadlessNode,
    ) -> Result<(), BackendError> {
        self.slot(parent)?;
        self.slot(child)?;
        self.detach(child.0);
        self.attach(parent.0, child.0, None);
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &HeadlessNode,
        child: &HeadlessNode,
        before: Option<&HeadlessNode>,
    ) -> Result<(), BackendError> {
        self.slot(parent)?;
        self.slot(child)?;
        let Some(before) = before else {
            self.detach(child.0);
            self.attach(parent.0, child.0, None);
            return Ok(());
        };
        if self.slot(before)?.parent != Some(parent.0) {
            return Err(BackendError::NotAChild);
        }
        self.detach(child.0);
        let index = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == before.0)
            .ok_or(BackendError::NotAChild)?;
        self.attach(parent.0, child.0, Some(index));
        Ok(())
    }

    fn remove_child(
        &mut self,
        parent: &HeadlessNode,
        child: &HeadlessNode,
    ) -> Result<(), BackendError> {
        if self.slot(child)?.parent != Some(parent.0) {
            return Err(BackendError::NotAChild);
        }
        self.detach(child.0);
        Ok(())
    }

    fn set_attribute(
        &mut self,
        node: &HeadlessNode,
        name: &str,
        value: &str,
    ) -> Result<(), BackendError> {
        let name = name.to_ascii_lowercase();
        let (attrs, ..) = self.element_mut(node)?;
        match attrs.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => attrs.push((name, value.to_string())),
        }
        Ok(())
    }

    fn remove_attribute(&mut self, node: &HeadlessNode, name: &str) -> Result<(), BackendError> {
        let name = name.to_ascii_lowercase();
        let (attrs, ..) = self.element_mut(node)?;
        attrs.retain(|(n, _)| *n != name);
        Ok(())
    }

    fn focus(&mut self, node: &HeadlessNode) -> Result<(), BackendError> {
        self.element_mut(node)?;
        self.focused = Some(node.0);
        Ok(())
    }

    fn set_text_content(&mut self, node: &HeadlessNode, value: &str) -> Result<(), BackendError> {
        match self.nodes.get_mut(node.0).map(|slot| &mut slot.data) {
            Some(NodeData::Text { data }) => {
                *data = value.to_string();
                Ok(())
            }
            Some(NodeData::Element { .. }) | Some(NodeData::Document) => {
                let children = std::mem::take(&mut self.nodes[node.0].children);
                for child in children {
                    self.nodes[child].parent = None;
                }
                if !value.is_empty() {
                    let text = self.create_text_node(value);
                    self.attach(node.0, text.0, None);
                }
                Ok(())
            }
            None => Err(BackendError::UnknownNode),
        }
    }

    fn set_value(&mut self, node: &HeadlessNode, value: &str) -> Result<(), BackendError> {
        let (_, slot_value, _) = self.element_mut(node)?;
        *slot_value = value.to_string();
        Ok(())
    }

    fn query_selector(
        &mut self,
        scope: &HeadlessNode,
        selector: &str,
    ) -> Result<Option<HeadlessNode>, SelectorError> {
        let compounds = parse_selector(selector)?;
        let mut out = Vec::new();
        self.select(scope.0, &compounds, 1, &mut out);
        Ok(out.into_iter().next())
    }

    fn query_selector_all(
        &mut self,
        scope: &HeadlessNode,
        selector: &str,
    ) -> Result<Vec<HeadlessNode>, SelectorError> {
        let compounds = parse_selector(selector)?;
        let mut out = Vec::new();
        self.select(scope.0, &compounds, usize::MAX, &mut out);
        Ok(out)
    }

    fn metric(&mut self, node: &HeadlessNode, metric: LayoutMetric) -> Result<i32, BackendError> {
        match self.slot(node)?.data {
            NodeData::Element { ref metrics, .. } => Ok(metrics.get(&metric).copied().unwrap_or(0)),
            _ => Err(BackendError::NotAnElement),
        }
    }

    fn set_scroll(
        &mut self,
        node: &HeadlessNode,
        axis: ScrollAxis,
        value: i32,
    ) -> Result<(), BackendError> {
        let metric = match axis {
            ScrollAxis::Horizontal => LayoutMetric::ScrollLeft,
            ScrollAxis::Vertical => LayoutMetric::ScrollTop,
        };
        match self.nodes.get_mut(node.0).map(|slot| &mut slot.data) {
            Some(NodeData::Element { metrics, .. }) => {
                metrics.insert(metric, value);
                Ok(())
            }
            Some(_) => Err(BackendError::NotAnElement),
            None => Err(BackendError::UnknownNode),
        }
    }

    fn scroll_to(
        &mut self,
        node: &HeadlessNode,
        scrollbox: &HeadlessNode,
        align_x: Option<&str>,
        align_y: Option<&str>,
        scroll_when_visible: bool,
    ) -> Result<(), BackendError> {
        self.slot(node)?;
        self.slot(scrollbox)?;
        self.last_scroll_to = Some(ScrollRequest {
            target: *node,
            scrollbox: *scrollbox,
            align_x: align_x.map(str::to_string),
            align_y: align_y.map(str::to_string),
            scroll_when_visible,
        });
        Ok(())
    }

    fn watch_events(&mut self, node: &HeadlessNode, event_type: &str) -> Result<(), BackendError> {
        let (.., watched) = self.element_mut(node)?;
        watched.insert(event_type.to_string());
        Ok(())
    }

    fn unwatch_events(
        &mut self,
        node: &HeadlessNode,
        event_type: &str,
    ) -> Result<(), BackendError> {
        let (.., watched) = self.element_mut(node)?;
        watched.remove(event_type);
        Ok(())
    }
}

struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Parses the selector subset panel templates use: tag names, `#id`,
/// `.class`, compounds of those, `*`, and the descendant combinator.
/// Anything else is rejected the way a real engine rejects bad syntax.
fn parse_selector(selector: &str) -> Result<Vec<CompoundSelector>, SelectorError> {
    let invalid = || SelectorError {
        selector: selector.to_string(),
    };

    let mut compounds = Vec::new();
    for part in selector.split_whitespace() {
        let bytes = part.as_bytes();
        let mut compound = CompoundSelector {
            tag: None,
            id: None,
            classes: Vec::new(),
        };
        let mut cursor = 0;
        if bytes[0] == b'*' {
            cursor = 1;
        } else if is_name_byte(bytes[0]) {
            while cursor < bytes.len() && is_name_byte(bytes[cursor]) {
                cursor += 1;
            }
            compound.tag = Some(part[..cursor].to_lowercase());
        }
        while cursor < bytes.len() {
            let marker = bytes[cursor];
            if marker != b'#' && marker != b'.' {
                return Err(invalid());
            }
            cursor += 1;
            let start = cursor;
            while cursor < bytes.len() && is_name_byte(bytes[cursor]) {
                cursor += 1;
            }
            if cursor == start {
                return Err(invalid());
            }
            let name = part[start..cursor].to_string();
            if marker == b'#' {
                compound.id = Some(name);
            } else {
                compound.classes.push(name);
            }
        }
        compounds.push(compound);
    }
    if compounds.is_empty() {
        return Err(invalid());
    }
    Ok(compounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (HeadlessDom, HeadlessNode, HeadlessNode, HeadlessNode) {
        let mut dom = HeadlessDom::new();
        let root = dom.create_element("div");
        let list = dom.create_element("ul");
        let item = dom.create_element("li");
        dom.set_attribute(&item, "class", "entry active").unwrap();
        dom.set_attribute(&item, "id", "first").unwrap();
        let doc = dom.document();
        dom.append_child(&doc, &root).unwrap();
        dom.append_child(&root, &list).unwrap();
        dom.append_child(&list, &item).unwrap();
        (dom, root, list, item)
    }

    #[test]
    fn selects_by_tag_id_and_class() {
        let (mut dom, root, _, item) = sample();
        assert_eq!(dom.query_selector(&root, "li").unwrap(), Some(item));
        assert_eq!(dom.query_selector(&root, "#first").unwrap(), Some(item));
        assert_eq!(
            dom.query_selector(&root, "ul .entry.active").unwrap(),
            Some(item)
        );
        assert_eq!(dom.query_selector(&root, "li.missing").unwrap(), None);
    }

    #[test]
    fn scope_is_excluded_from_matches() {
        let (mut dom, root, ..) = sample();
        assert_eq!(dom.query_selector(&root, "div").unwrap(), None);
    }

    #[test]
    fn rejects_selector_syntax_it_does_not_know() {
        let (mut dom, root, ..) = sample();
        assert!(dom.query_selector(&root, "li[data-x]").is_err());
        assert!(dom.query_selector(&root, "").is_err());
        assert!(dom.query_selector(&root, "li:hover").is_err());
    }

    #[test]
    fn serializes_with_escaped_text_and_attributes() {
        let mut dom = HeadlessDom::new();
        let el = dom.create_element("span");
        dom.set_attribute(&el, "title", "a\"b").unwrap();
        dom.set_text_content(&el, "1 < 2").unwrap();
        assert_eq!(dom.outer_html(el), "<span title=\"a&quot;b\">1 &lt; 2</span>");
    }

    #[test]
    fn text_content_replaces_children() {
        let (mut dom, root, list, _) = sample();
        dom.set_text_content(&root, "emptied").unwrap();
        assert_eq!(dom.children(root).len(), 1);
        assert_eq!(dom.text_content(root), "emptied");
        assert_eq!(dom.parent(list), None);
    }
}
