use std::cell::RefCell;
use std::rc::Rc;

use teledom::{
    ChannelError, CommandReply, DomCommand, EventDisposition, HeadlessDom, MessageChannel,
    PanelSession, RemoteId,
};

#[test]
fn capturing_fires_root_to_target_then_bubbling_target_to_root() {
    let mut session = session();
    let (root, mid, leaf) = build_chain(&mut session);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let dom = session.dom();
    dom.add_event_listener(root, "click", true, log(&calls, "root-capturing"))
        .expect("root listener");
    dom.add_event_listener(mid, "click", false, log(&calls, "mid-bubbling"))
        .expect("mid listener");
    dom.add_event_listener(leaf, "click", false, log(&calls, "leaf-bubbling"))
        .expect("leaf listener");

    let target = session.backend_node(leaf).expect("leaf backend node");
    let disposition = session.deliver_event("click", &target);

    assert_eq!(
        disposition,
        EventDisposition::Handled {
            default_prevented: false
        }
    );
    assert_eq!(
        *calls.borrow(),
        ["root-capturing", "leaf-bubbling", "mid-bubbling"]
    );
}

#[test]
fn returning_false_stops_propagation_and_prevents_default() {
    let mut session = session();
    let (root, mid, leaf) = build_chain(&mut session);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let dom = session.dom();
    dom.add_event_listener(root, "click", true, log(&calls, "root-capturing"))
        .expect("root listener");
    dom.add_event_listener(mid, "click", false, log(&calls, "mid-bubbling"))
        .expect("mid listener");
    {
        let calls = Rc::clone(&calls);
        dom.add_event_listener(leaf, "click", false, move |_, _| {
            calls.borrow_mut().push("leaf-bubbling".to_string());
            false
        })
        .expect("leaf listener");
    }

    let target = session.backend_node(leaf).expect("leaf backend node");
    let disposition = session.deliver_event("click", &target);

    assert_eq!(
        disposition,
        EventDisposition::Handled {
            default_prevented: true
        }
    );
    assert_eq!(*calls.borrow(), ["root-capturing", "leaf-bubbling"]);
}

#[test]
fn stop_propagation_halts_delivery_without_preventing_default() {
    let mut session = session();
    let (root, mid, leaf) = build_chain(&mut session);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let dom = session.dom();
    {
        let calls = Rc::clone(&calls);
        dom.add_event_listener(leaf, "click", false, move |_, event| {
            calls.borrow_mut().push("leaf".to_string());
            event.stop_propagation();
            true
        })
        .expect("leaf listener");
    }
    dom.add_event_listener(mid, "click", false, log(&calls, "mid"))
        .expect("mid listener");
    dom.add_event_listener(root, "click", false, log(&calls, "root"))
        .expect("root listener");

    let target = session.backend_node(leaf).expect("leaf backend node");
    let disposition = session.deliver_event("click", &target);

    assert_eq!(
        disposition,
        EventDisposition::Handled {
            default_prevented: false
        }
    );
    assert_eq!(*calls.borrow(), ["leaf"]);
}

#[test]
fn listeners_see_target_and_current_target() {
    let mut session = session();
    let (_, mid, leaf) = build_chain(&mut session);
    let seen = Rc::new(RefCell::new(None));

    let dom = session.dom();
    {
        let seen = Rc::clone(&seen);
        dom.add_event_listener(mid, "click", false, move |_, event| {
            *seen.borrow_mut() = Some((event.target(), event.current_target()));
            true
        })
        .expect("mid listener");
    }

    let target = session.backend_node(leaf).expect("leaf backend node");
    session.deliver_event("click", &target);

    let (target_seen, current) = seen.borrow().expect("listener ran");
    assert_eq!(target_seen, leaf.as_node());
    assert_eq!(current, Some(mid));
}

#[test]
fn listeners_may_mutate_the_dom_mid_dispatch() {
    let mut session = session();
    let (_, mid, leaf) = build_chain(&mut session);

    let dom = session.dom();
    dom.add_event_listener(leaf, "click", false, move |dom, event| {
        let current = event.current_target().expect("current target");
        dom.set_attribute(current, "data-clicked", "yes")
            .expect("mutate from listener");
        true
    })
    .expect("leaf listener");
    let _ = mid;

    let target = session.backend_node(leaf).expect("leaf backend node");
    session.deliver_event("click", &target);

    let backend_leaf = session.backend_node(leaf).expect("leaf backend node");
    let recorded = session.with_backend(|b| {
        b.attribute(backend_leaf, "data-clicked").map(str::to_string)
    });
    assert_eq!(recorded.as_deref(), Some("yes"));
}

#[test]
fn events_for_unmanaged_targets_are_skipped() {
    let mut session = session();
    let (_, _, leaf) = build_chain(&mut session);
    session
        .dom()
        .add_event_listener(leaf, "click", false, |_, _| true)
        .expect("listener");

    let foreign = session.with_backend_mut(|b| {
        use teledom::DomBackend;
        b.create_element("button")
    });
    assert_eq!(
        session.deliver_event("click", &foreign),
        EventDisposition::Unmanaged
    );
}

#[test]
fn events_bubble_from_text_targets_through_their_element_chain() {
    let mut session = session();
    let (_, _, leaf) = build_chain(&mut session);
    let calls = Rc::new(RefCell::new(Vec::new()));

    let dom = session.dom();
    let text = dom.create_text_node("label").expect("text");
    dom.append_child(leaf, text).expect("append text");
    dom.add_event_listener(leaf, "select", false, log(&calls, "leaf"))
        .expect("leaf listener");

    let target = session.with_backend(|b| {
        let leaf_node = b
            .children(b.document())
            .first()
            .copied()
            .map(|root| descend_to_text(b, root))
            .expect("panel root");
        leaf_node
    });
    let disposition = session.deliver_event("select", &target);
    assert_eq!(
        disposition,
        EventDisposition::Handled {
            default_prevented: false
        }
    );
    assert_eq!(*calls.borrow(), ["leaf"]);
}

#[test]
fn second_listener_of_a_type_sends_no_add_listener_message() {
    let (mut dom, log) = recording_dom();
    let el = dom.create_element("div").expect("el");

    let first = dom
        .add_event_listener(el, "click", false, |_, _| true)
        .expect("first");
    let second = dom
        .add_event_listener(el, "click", true, |_, _| true)
        .expect("second");
    assert_eq!(count_add_listener(&log), 1);

    // a different event type is its own subscription
    dom.add_event_listener(el, "keypress", false, |_, _| true)
        .expect("keypress");
    assert_eq!(count_add_listener(&log), 2);

    dom.remove_event_listener(el, "click", first)
        .expect("remove first");
    assert_eq!(count_remove_listener(&log), 0);
    dom.remove_event_listener(el, "click", second)
        .expect("remove second");
    assert_eq!(count_remove_listener(&log), 1);

    // removing an unknown token is silently ignored
    dom.remove_event_listener(el, "click", first)
        .expect("remove again");
    assert_eq!(count_remove_listener(&log), 1);
}

#[test]
fn server_installs_one_backend_watch_per_type() {
    let mut session = session();
    let (_, _, leaf) = build_chain(&mut session);

    let dom = session.dom();
    let a = dom
        .add_event_listener(leaf, "click", false, |_, _| true)
        .expect("a");
    let b = dom
        .add_event_listener(leaf, "click", false, |_, _| true)
        .expect("b");

    let backend_leaf = session.backend_node(leaf).expect("backend leaf");
    assert!(session.with_backend(|bk| bk.is_watching(backend_leaf, "click")));

    session
        .dom()
        .remove_event_listener(leaf, "click", a)
        .expect("remove a");
    assert!(session.with_backend(|bk| bk.is_watching(backend_leaf, "click")));

    session
        .dom()
        .remove_event_listener(leaf, "click", b)
        .expect("remove b");
    assert!(!session.with_backend(|bk| bk.is_watching(backend_leaf, "click")));
}

// ---- helpers ---------------------------------------------------------------

type SharedLog = Rc<RefCell<Vec<DomCommand>>>;

struct RecordingChannel {
    log: SharedLog,
}

impl MessageChannel for RecordingChannel {
    fn send(&mut self, _target: RemoteId, command: DomCommand) -> Result<CommandReply, ChannelError> {
        let reply = match &command {
            DomCommand::GetMetric { .. } => CommandReply::Metric { value: 0 },
            DomCommand::QuerySelector { .. } => CommandReply::Match { node: None },
            DomCommand::QuerySelectorAll { .. } => CommandReply::Matches { nodes: Vec::new() },
            _ => CommandReply::None,
        };
        self.log.borrow_mut().push(command);
        Ok(reply)
    }
}

fn recording_dom() -> (teledom::RemoteDom, SharedLog) {
    let log: SharedLog = Rc::new(RefCell::new(Vec::new()));
    let channel = RecordingChannel {
        log: Rc::clone(&log),
    };
    (teledom::RemoteDom::new(Box::new(channel)), log)
}

fn count_add_listener(log: &SharedLog) -> usize {
    log.borrow()
        .iter()
        .filter(|c| matches!(c, DomCommand::AddListener { .. }))
        .count()
}

fn count_remove_listener(log: &SharedLog) -> usize {
    log.borrow()
        .iter()
        .filter(|c| matches!(c, DomCommand::RemoveListener { .. }))
        .count()
}

fn session() -> PanelSession<HeadlessDom> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    PanelSession::connect(HeadlessDom::new())
}

/// panel root -> mid -> leaf, mounted under the backend document.
fn build_chain(
    session: &mut PanelSession<HeadlessDom>,
) -> (
    teledom::ElementHandle,
    teledom::ElementHandle,
    teledom::ElementHandle,
) {
    let root = session.create_panel_node().expect("panel root");
    let doc = session.with_backend(|b| b.document());
    session.mount_panel(root, &doc).expect("mount");

    let dom = session.dom();
    let mid = dom.create_element("div").expect("mid");
    let leaf = dom.create_element("button").expect("leaf");
    dom.append_child(root, mid).expect("append mid");
    dom.append_child(mid, leaf).expect("append leaf");
    (root, mid, leaf)
}

fn log(
    calls: &Rc<RefCell<Vec<String>>>,
    label: &'static str,
) -> impl FnMut(&mut teledom::RemoteDom, &mut teledom::DomEvent) -> bool {
    let calls = Rc::clone(calls);
    move |_, _| {
        calls.borrow_mut().push(label.to_string());
        true
    }
}

fn descend_to_text(backend: &HeadlessDom, node: teledom::HeadlessNode) -> teledom::HeadlessNode {
    let children = backend.children(node);
    match children.first() {
        Some(child) => descend_to_text(backend, *child),
        None => node,
    }
}
