// Tests for project node types: scripted behaviors, forking, live
// source swaps and changing a node's type in place.

use std::collections::BTreeMap;
use weft_core::snapshot::{
    ConnectionSnapshot, NodeSnapshot, PortValueSnapshot, Snapshot, TypeSnapshot,
    TypeSourceSnapshot, VERSION,
};
use weft_core::{
    Behavior, HookError, Library, Literal, Network, NetworkError, Node, Port, PortType, RenderCtx,
    TypeSource, Warning,
};

/// A number holder: `value` in, `out` out.
#[derive(Default)]
struct Source;

impl Behavior for Source {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("value", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("out", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        ctx.set_output("out", Literal::Number(ctx.number("value")));
        Ok(())
    }
}

/// Doubles its input.
#[derive(Default)]
struct Double;

impl Behavior for Double {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        node.add_input(Port::input("value", PortType::Number).with_default(Literal::Number(0.0)));
        node.add_output(Port::output("out", PortType::Number));
        Ok(())
    }

    fn renders(&self) -> bool {
        true
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        ctx.set_output("out", Literal::Number(2.0 * ctx.number("value")));
        Ok(())
    }
}

fn test_library() -> Library {
    let mut lib = Library::new();
    lib.register("test.source", "Source", "A number holder.", Source::default);
    lib.register("test.double", "Double", "Doubles a number.", Double::default);
    lib
}

fn number(n: &Network, id: u64, port: &str) -> f64 {
    n.output_value(id, port).unwrap().as_number().unwrap()
}

const DOUBLER: &str = r#"
(define ports '((in number "value" 0) (out number "out")))
(define (render inputs)
  (hash "out" (* 2 (hash-ref inputs "value"))))
"#;

const TRIPLER: &str = r#"
(define ports '((in number "value" 0) (out number "out")))
(define (render inputs)
  (hash "out" (* 3 (hash-ref inputs "value"))))
"#;

/// Same out-port, renamed in-port. Swapping to this drops `value`.
const RENAMED: &str = r#"
(define ports '((in number "input" 0) (out number "out")))
(define (render inputs)
  (hash "out" (hash-ref inputs "input")))
"#;

const COUNTER: &str = r#"
(define ports '((in trigger "go") (out number "count")))
(define count 0)
(define (render inputs)
  (begin
    (if (hash-ref inputs "go") (set! count (+ count 1)) void)
    (hash "count" count)))
"#;

const TICKING: &str = r#"
(define ports '((out number "out")))
(define time-dependent #t)
(define (render inputs)
  (hash "out" 1))
"#;

#[test]
fn scripted_types_load_and_render() {
    let mut snapshot = Snapshot {
        version: VERSION,
        nodes: vec![
            NodeSnapshot {
                id: 1,
                name: "in".into(),
                type_id: "test.source".into(),
                x: 0.0,
                y: 0.0,
                values: BTreeMap::new(),
            },
            NodeSnapshot {
                id: 2,
                name: "doubler".into(),
                type_id: "project.doubler".into(),
                x: 0.0,
                y: 0.0,
                values: BTreeMap::new(),
            },
        ],
        connections: vec![ConnectionSnapshot {
            out_node: 1,
            out_port: "out".into(),
            in_node: 2,
            in_port: "value".into(),
        }],
        types: vec![TypeSnapshot {
            name: "Doubler".into(),
            type_id: "project.doubler".into(),
            source: TypeSourceSnapshot::Script(DOUBLER.into()),
            description: String::new(),
        }],
        settings: BTreeMap::new(),
    };
    snapshot.nodes[0].values.insert(
        "value".to_string(),
        PortValueSnapshot::Value {
            value: serde_json::json!(21.0),
        },
    );

    let mut n = Network::new(test_library());
    let warnings = n.parse(&snapshot).unwrap();
    assert!(warnings.is_empty());

    n.render();
    assert_eq!(number(&n, 2, "out"), 42.0);

    // The project type travels with the document.
    let out = n.serialize();
    assert_eq!(out.types.len(), 1);
    assert_eq!(out.types[0].type_id, "project.doubler");
}

#[test]
fn forked_builtins_keep_behaving_until_edited() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.mine").unwrap();

    let ty = n.node_type("project.mine").unwrap();
    assert!(ty.is_project());
    assert_eq!(ty.source, TypeSource::Builtin("test.double".into()));

    // Instances of the fork run the original compiled behavior.
    let id = n.create_node("project.mine").unwrap();
    n.set_port_value(id, "value", Literal::Number(4.0)).unwrap();
    n.render();
    assert_eq!(number(&n, id, "out"), 8.0);
}

#[test]
fn fork_validates_names_and_sources() {
    let mut n = Network::new(test_library());
    assert!(matches!(
        n.fork_node_type("test.double", "my.copy"),
        Err(NetworkError::NotProject(_))
    ));
    assert!(matches!(
        n.fork_node_type("test.double", "project.a").and_then(|()| {
            n.fork_node_type("test.source", "project.a")
        }),
        Err(NetworkError::TypeExists(_))
    ));
    assert!(matches!(
        n.fork_node_type("test.unknown", "project.b"),
        Err(NetworkError::UnknownType(_))
    ));
}

#[test]
fn source_swaps_only_touch_project_types() {
    let mut n = Network::new(test_library());
    assert!(matches!(
        n.set_node_type_source("test.double", DOUBLER),
        Err(NetworkError::NotProject(_))
    ));
    assert!(matches!(
        n.set_node_type_source("project.ghost", DOUBLER),
        Err(NetworkError::UnknownType(_))
    ));
}

// The editing loop: fork a built-in, point two instances at the fork,
// then swap in new source. Both instances must keep their identity and
// pick up the new logic.
#[test]
fn swapping_source_rewires_every_instance() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.mine").unwrap();
    let a = n.create_node_at("project.mine", 1.0, 2.0).unwrap();
    let b = n.create_node_at("project.mine", 3.0, 4.0).unwrap();
    n.set_port_value(a, "value", Literal::Number(5.0)).unwrap();
    n.set_port_value(b, "value", Literal::Number(7.0)).unwrap();
    n.render();
    assert_eq!(number(&n, a, "out"), 10.0);
    assert_eq!(number(&n, b, "out"), 14.0);

    let warnings = n.set_node_type_source("project.mine", TRIPLER).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(
        n.node_type("project.mine").unwrap().source,
        TypeSource::Script(TRIPLER.into())
    );

    // Same ids, same positions, same stored values; new behavior, and
    // both instances were marked for re-evaluation.
    assert_eq!(n.node(a).unwrap().position(), (1.0, 2.0));
    assert_eq!(n.node(b).unwrap().position(), (3.0, 4.0));
    assert!(n.node(a).unwrap().is_dirty());
    n.render();
    assert_eq!(number(&n, a, "out"), 15.0);
    assert_eq!(number(&n, b, "out"), 21.0);
}

#[test]
fn swaps_drop_connections_to_vanished_ports() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.mine").unwrap();
    let src = n.create_node("test.source").unwrap();
    let mine = n.create_node("project.mine").unwrap();
    n.connect(src, "out", mine, "value").unwrap();

    // The new source renames `value` to `input`; the edge cannot
    // survive.
    let warnings = n.set_node_type_source("project.mine", RENAMED).unwrap();
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::PortRemoved { port, .. } if port == "value")));
    assert!(n.connections().is_empty());
    assert!(n.node(mine).unwrap().input("input").is_some());
    assert!(n.node(mine).unwrap().input("value").is_none());
}

#[test]
fn a_broken_swap_leaves_a_portless_node() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.mine").unwrap();
    let id = n.create_node("project.mine").unwrap();

    let warnings = n
        .set_node_type_source("project.mine", "(define broken")
        .unwrap();
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::SetupFailed { .. })));
    assert!(n.node(id).unwrap().inputs().is_empty());

    // A corrected swap brings the ports back.
    let warnings = n.set_node_type_source("project.mine", DOUBLER).unwrap();
    assert!(warnings.is_empty());
    assert!(n.node(id).unwrap().input("value").is_some());
}

#[test]
fn script_state_persists_across_renders() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.counter").unwrap();
    n.set_node_type_source("project.counter", COUNTER).unwrap();
    let id = n.create_node("project.counter").unwrap();

    n.set_port_value(id, "go", Literal::Trigger).unwrap();
    n.render();
    assert_eq!(number(&n, id, "count"), 1.0);

    n.set_port_value(id, "go", Literal::Trigger).unwrap();
    n.render();
    assert_eq!(number(&n, id, "count"), 2.0);

    // Re-rendering without a pulse does not count.
    n.mark_node_dirty(id).unwrap();
    n.render();
    assert_eq!(number(&n, id, "count"), 2.0);
}

#[test]
fn scripts_can_declare_time_dependence() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.tick").unwrap();
    n.set_node_type_source("project.tick", TICKING).unwrap();
    let id = n.create_node("project.tick").unwrap();
    assert!(n.node(id).unwrap().is_time_dependent());
}

#[test]
fn changing_a_nodes_type_preserves_identity_and_values() {
    let mut n = Network::new(test_library());
    let id = n.create_node_at("test.source", 5.0, 6.0).unwrap();
    n.set_port_value(id, "value", Literal::Number(21.0)).unwrap();
    n.render();
    assert_eq!(number(&n, id, "out"), 21.0);

    let warnings = n.change_node_type(id, "test.double").unwrap();
    assert!(warnings.is_empty());

    let node = n.node(id).unwrap();
    assert_eq!(node.type_id(), "test.double");
    assert_eq!(node.name(), "Double");
    assert_eq!(node.position(), (5.0, 6.0));
    // The same-named, same-typed in-port carried its value over.
    n.render();
    assert_eq!(number(&n, id, "out"), 42.0);
}

#[test]
fn changing_type_prunes_connections_to_missing_ports() {
    let mut n = Network::new(test_library());
    n.fork_node_type("test.double", "project.renamed").unwrap();
    n.set_node_type_source("project.renamed", RENAMED).unwrap();
    let src = n.create_node("test.source").unwrap();
    let dbl = n.create_node("test.double").unwrap();
    n.connect(src, "out", dbl, "value").unwrap();

    // `project.renamed` has no `value` in-port, so the edge goes away.
    let warnings = n.change_node_type(dbl, "project.renamed").unwrap();
    assert!(warnings
        .iter()
        .any(|w| matches!(w, Warning::Dangling { .. })));
    assert!(n.connections().is_empty());

    assert!(matches!(
        n.change_node_type(dbl, "test.unknown"),
        Err(NetworkError::UnknownType(_))
    ));
    assert!(matches!(
        n.change_node_type(999, "test.double"),
        Err(NetworkError::UnknownNode(999))
    ));
}

#[test]
fn insertion_order_survives_a_type_change() {
    let mut n = Network::new(test_library());
    let a = n.create_node("test.source").unwrap();
    let b = n.create_node("test.source").unwrap();
    let c = n.create_node("test.source").unwrap();
    n.change_node_type(b, "test.double").unwrap();

    let ids: Vec<_> = n.nodes().iter().map(Node::id).collect();
    assert_eq!(ids, [a, b, c]);
}
