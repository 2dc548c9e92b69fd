use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier naming one live node to both sides of a connection.
///
/// Ids are allocated by the client from a monotonically increasing counter and
/// are never reused within a connection's lifetime. A destroyed node has no id
/// at all; the wire never carries the zero tombstone, it is represented as the
/// absence of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(NonZeroU32);

impl RemoteId {
    pub const FIRST: RemoteId = RemoteId(NonZeroU32::MIN);

    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(RemoteId)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The id after this one in allocation order.
    pub fn next(self) -> Self {
        RemoteId(self.0.checked_add(1).expect("remote id space exhausted"))
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Layout-affected element metrics. These are served by a round trip to the
/// real DOM on every access; the client never caches them because layout can
/// change outside the protocol's control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutMetric {
    ClientWidth,
    ClientHeight,
    OffsetWidth,
    OffsetHeight,
    OffsetLeft,
    OffsetTop,
    ScrollLeft,
    ScrollTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollAxis {
    Horizontal,
    Vertical,
}

/// One client-to-server message. Every command is addressed to the remote id
/// of its receiver node, carried separately in the channel envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomCommand {
    CreateAndCacheElement {
        tag_name: String,
    },
    CreateAndCacheTextNode {
        text: String,
    },
    RemoveNodeFromCache,
    AddListener {
        event: String,
    },
    RemoveListener {
        event: String,
    },
    AppendChild {
        child: RemoteId,
    },
    RemoveChild {
        child: RemoteId,
    },
    InsertBefore {
        child: RemoteId,
        before: Option<RemoteId>,
    },
    SetAttribute {
        name: String,
        value: String,
    },
    RemoveAttribute {
        name: String,
    },
    Focus,
    SetTextContent {
        value: String,
    },
    SetValue {
        value: String,
    },
    QuerySelector {
        selector: String,
    },
    QuerySelectorAll {
        selector: String,
    },
    GetMetric {
        metric: LayoutMetric,
    },
    SetScroll {
        axis: ScrollAxis,
        value: i32,
    },
    RemoteScrollTo {
        scrollbox: RemoteId,
        align_x: Option<String>,
        align_y: Option<String>,
        scroll_when_visible: bool,
    },
}

impl DomCommand {
    /// Whether the sender blocks on a meaningful reply. Pure mutations are
    /// fire-and-continue; queries wait for the server's answer.
    pub fn expects_reply(&self) -> bool {
        matches!(
            self,
            DomCommand::QuerySelector { .. }
                | DomCommand::QuerySelectorAll { .. }
                | DomCommand::GetMetric { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomCommand::CreateAndCacheElement { .. } => "create_and_cache_element",
            DomCommand::CreateAndCacheTextNode { .. } => "create_and_cache_text_node",
            DomCommand::RemoveNodeFromCache => "remove_node_from_cache",
            DomCommand::AddListener { .. } => "add_listener",
            DomCommand::RemoveListener { .. } => "remove_listener",
            DomCommand::AppendChild { .. } => "append_child",
            DomCommand::RemoveChild { .. } => "remove_child",
            DomCommand::InsertBefore { .. } => "insert_before",
            DomCommand::SetAttribute { .. } => "set_attribute",
            DomCommand::RemoveAttribute { .. } => "remove_attribute",
            DomCommand::Focus => "focus",
            DomCommand::SetTextContent { .. } => "set_text_content",
            DomCommand::SetValue { .. } => "set_value",
            DomCommand::QuerySelector { .. } => "query_selector",
            DomCommand::QuerySelectorAll { .. } => "query_selector_all",
            DomCommand::GetMetric { .. } => "get_metric",
            DomCommand::SetScroll { .. } => "set_scroll",
            DomCommand::RemoteScrollTo { .. } => "remote_scroll_to",
        }
    }
}

/// Server's answer to a [`DomCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandReply {
    None,
    Metric { value: i32 },
    Match { node: Option<RemoteId> },
    Matches { nodes: Vec<RemoteId> },
    /// Selector syntax the real DOM engine rejected. A normal, expected
    /// failure mode, distinct from protocol corruption.
    InvalidSelector,
}

/// Notification the server pushes when a real DOM event fires on a managed
/// node. The client answers with its prevent-default decision before the
/// server resumes handling the real event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventNotice {
    pub event_type: String,
    pub target: RemoteId,
}

/// Synchronous call-and-return channel from client to server.
///
/// Each send blocks the caller until the server has applied the command and
/// replied; operations are totally ordered by issue order. There is no
/// timeout or retry: a transport failure surfaces as [`ChannelError`] and the
/// bundled implementations make every subsequent send fail the same way.
pub trait MessageChannel {
    fn send(&mut self, target: RemoteId, command: DomCommand) -> Result<CommandReply, ChannelError>;
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection closed")]
    Closed,
    #[error("channel busy: server side re-entered")]
    Busy,
    #[error("remote error: {0}")]
    Remote(String),
    #[error("malformed wire message: {0}")]
    Codec(#[from] serde_json::Error),
}

/// JSON envelope for transports that carry commands across a process
/// boundary. In-process channels hand [`DomCommand`] values over directly and
/// never touch this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub target: RemoteId,
    #[serde(flatten)]
    pub command: DomCommand,
}

impl WireMessage {
    pub fn to_json(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ChannelError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_tag_like_the_wire_expects() {
        let msg = WireMessage {
            target: RemoteId::FIRST,
            command: DomCommand::SetAttribute {
                name: "class".into(),
                value: "panel".into(),
            },
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"set_attribute\""), "got {json}");
        assert!(json.contains("\"target\":1"), "got {json}");
        assert_eq!(WireMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn insert_before_roundtrips_optional_reference() {
        let msg = WireMessage {
            target: RemoteId::new(4).unwrap(),
            command: DomCommand::InsertBefore {
                child: RemoteId::new(9).unwrap(),
                before: None,
            },
        };
        let json = msg.to_json().unwrap();
        assert_eq!(WireMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn only_queries_expect_replies() {
        assert!(DomCommand::QuerySelector {
            selector: "div".into()
        }
        .expects_reply());
        assert!(DomCommand::GetMetric {
            metric: LayoutMetric::ScrollTop
        }
        .expects_reply());
        assert!(!DomCommand::Focus.expects_reply());
        assert!(!DomCommand::AppendChild {
            child: RemoteId::FIRST
        }
        .expects_reply());
    }

    #[test]
    fn remote_ids_allocate_monotonically() {
        let first = RemoteId::FIRST;
        assert_eq!(first.get(), 1);
        assert_eq!(first.next().get(), 2);
        assert!(first < first.next());
    }
}
