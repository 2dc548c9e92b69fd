use teledom::{DomError, HeadlessDom, PanelSession};

#[test]
fn parses_nested_markup_with_attributes_and_text() {
    let mut session = session();
    let dom = session.dom();

    let frag = dom
        .parse_markup(r#"<div class="x">hi<span>there</span></div>"#)
        .expect("parse");

    let members = dom.fragment_nodes(frag).expect("members");
    assert_eq!(members.len(), 1);
    let div = dom.as_element(members[0]).expect("div element");
    assert_eq!(dom.tag_name(div).unwrap(), "DIV");
    assert_eq!(dom.class_name(div).unwrap(), Some("x".into()));

    let children = dom.child_nodes(div).unwrap();
    assert_eq!(children.len(), 2);
    let text = dom.as_text(children[0]).expect("leading text");
    assert_eq!(dom.text_data(text).unwrap(), "hi");
    let span = dom.as_element(children[1]).expect("span");
    assert_eq!(dom.tag_name(span).unwrap(), "SPAN");
    assert_eq!(dom.text_content(span).unwrap(), "there");
}

#[test]
fn unbalanced_markup_is_invalid() {
    let mut session = session();
    let dom = session.dom();

    let err = dom.parse_markup("<a><b></a>").unwrap_err();
    assert!(err.to_string().contains("invalid markup"), "got {err}");
    let err = dom.parse_markup("<a></a></a>").unwrap_err();
    assert!(err.to_string().contains("invalid markup"), "got {err}");
}

#[test]
fn attribute_syntax_errors_are_reported_by_reason() {
    let mut session = session();
    let dom = session.dom();

    let err = dom.parse_markup("<div class=x>").unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid markup (unquoted attribute value)"
    );
    let err = dom.parse_markup("<div class=\"x>").unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid markup (no end of attribute value)"
    );
    let err = dom.parse_markup("<div class").unwrap_err();
    assert_eq!(err.to_string(), "invalid markup (missing attribute value)");
    let err = dom.parse_markup("<div ").unwrap_err();
    assert_eq!(err.to_string(), "invalid markup (no end of tag)");
    let err = dom.parse_markup("<div /x>").unwrap_err();
    assert_eq!(err.to_string(), "invalid markup (unexpected /)");
}

#[test]
fn self_closing_tags_pop_immediately() {
    let mut session = session();
    let dom = session.dom();

    let frag = dom
        .parse_markup(r#"<ul><li id="a"/><li id="b"/></ul>"#)
        .expect("parse");
    let members = dom.fragment_nodes(frag).expect("members");
    let ul = dom.as_element(members[0]).expect("ul");
    let items = dom.child_nodes(ul).unwrap();
    assert_eq!(items.len(), 2);
    let first = dom.as_element(items[0]).expect("li");
    assert_eq!(dom.get_attribute(first, "id").unwrap(), Some("a".into()));
}

#[test]
fn text_runs_are_entity_unescaped() {
    let mut session = session();
    let dom = session.dom();

    let frag = dom
        .parse_markup("<span>&lt;b&gt; &amp; &quot;q&quot;</span>")
        .expect("parse");
    let members = dom.fragment_nodes(frag).expect("members");
    let span = dom.as_element(members[0]).expect("span");
    assert_eq!(dom.text_content(span).unwrap(), "<b> & \"q\"");
}

#[test]
fn bare_text_becomes_fragment_members() {
    let mut session = session();
    let dom = session.dom();

    let frag = dom.parse_markup("leading<span></span>").expect("parse");
    let members = dom.fragment_nodes(frag).expect("members");
    assert_eq!(members.len(), 2);
    let text = dom.as_text(members[0]).expect("text member");
    assert_eq!(dom.text_data(text).unwrap(), "leading");
}

#[test]
fn inner_html_replaces_content_and_reaches_the_server() {
    let mut session = session();
    let panel = session.create_panel_node().expect("panel");
    let doc = session.with_backend(|b| b.document());
    session.mount_panel(panel, &doc).expect("mount");

    let dom = session.dom();
    dom.set_text_content(panel, "old").expect("seed text");
    dom.set_inner_html(panel, r#"<p title="note">fresh</p>"#)
        .expect("inner html");

    let children = dom.child_nodes(panel).unwrap();
    assert_eq!(children.len(), 1);
    let p = dom.as_element(children[0]).expect("p");
    assert_eq!(dom.text_content(p).unwrap(), "fresh");

    let html = session.with_backend(|b| b.inner_html(b.document()));
    assert_eq!(html, r#"<div><p title="note">fresh</p></div>"#);
}

#[test]
fn malformed_inner_html_leaves_the_element_untouched() {
    let mut session = session();
    let panel = session.create_panel_node().expect("panel");

    let dom = session.dom();
    dom.set_text_content(panel, "kept").expect("seed text");
    let err = dom.set_inner_html(panel, "<a><b></a>").unwrap_err();
    assert!(matches!(err, DomError::Markup(_)));
    assert_eq!(dom.text_content(panel).unwrap(), "kept");
}

fn session() -> PanelSession<HeadlessDom> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    PanelSession::connect(HeadlessDom::new())
}
