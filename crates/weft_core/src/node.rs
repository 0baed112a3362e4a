//! Node instances and the port declaration surface behaviors build against.

use crate::port::{Direction, Port};

/// Identifier for a node within its network. Monotonic, never reused.
pub type Id = u64;

/// An instance of a node type.
///
/// Ports are declared in setup order; that order is part of the node's
/// public shape and survives serialization. A freshly created node is dirty
/// so the first render pass evaluates it.
#[derive(Clone, Debug)]
pub struct Node {
    id: Id,
    name: String,
    type_id: String,
    x: f64,
    y: f64,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    dirty: bool,
    time_dependent: bool,
    retired_inputs: Vec<Port>,
    retired_outputs: Vec<Port>,
}

impl Node {
    pub(crate) fn new(
        id: Id,
        name: impl Into<String>,
        type_id: impl Into<String>,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            type_id: type_id.into(),
            x,
            y,
            inputs: Vec::new(),
            outputs: Vec::new(),
            dirty: true,
            time_dependent: false,
            retired_inputs: Vec::new(),
            retired_outputs: Vec::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The namespaced identifier of the type this node was built from.
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub(crate) fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn is_time_dependent(&self) -> bool {
        self.time_dependent
    }

    /// Flag this node for re-execution every frame. Called from setup.
    pub fn set_time_dependent(&mut self, time_dependent: bool) {
        self.time_dependent = time_dependent;
    }

    /// Declare an input port. Duplicate names within a direction are
    /// rejected with a warning; a retired port of the same name and type is
    /// revived with its live state (see [`Node::begin_rebuild`]).
    pub fn add_input(&mut self, port: Port) {
        self.declare(port, Direction::In);
    }

    /// Declare an output port. Same rules as [`Node::add_input`].
    pub fn add_output(&mut self, port: Port) {
        self.declare(port, Direction::Out);
    }

    fn declare(&mut self, mut port: Port, direction: Direction) {
        if port.direction() != direction {
            log::warn!(
                "node {} ({}): port `{}` declared through the wrong direction, skipped",
                self.id,
                self.name,
                port.name(),
            );
            return;
        }
        let (ports, retired) = match direction {
            Direction::In => (&mut self.inputs, &mut self.retired_inputs),
            Direction::Out => (&mut self.outputs, &mut self.retired_outputs),
        };
        if ports.iter().any(|p| p.name() == port.name()) {
            log::warn!(
                "node {} ({}): duplicate {} port `{}` skipped",
                self.id,
                self.name,
                direction,
                port.name(),
            );
            return;
        }
        if let Some(pos) = retired.iter().position(|p| p.name() == port.name()) {
            let old = retired.remove(pos);
            // Same name and type keeps the live state, unless the old value
            // was an untouched default, which follows the new declaration.
            if old.port_type() == port.port_type() && !old.is_default() {
                port.adopt_state(old);
            }
        }
        ports.push(port);
    }

    pub fn inputs(&self) -> &[Port] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name() == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name() == name)
    }

    pub(crate) fn inputs_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.inputs.iter_mut()
    }

    pub(crate) fn outputs_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.outputs.iter_mut()
    }

    pub(crate) fn input_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.inputs.iter_mut().find(|p| p.name() == name)
    }

    pub(crate) fn output_mut(&mut self, name: &str) -> Option<&mut Port> {
        self.outputs.iter_mut().find(|p| p.name() == name)
    }

    /// Stash the current ports so a re-run of setup can revive them by
    /// name. Must be paired with [`Node::finish_rebuild`].
    pub(crate) fn begin_rebuild(&mut self) {
        self.retired_inputs = std::mem::take(&mut self.inputs);
        self.retired_outputs = std::mem::take(&mut self.outputs);
        self.time_dependent = false;
    }

    /// Drop the ports the new setup did not re-declare, returning them so
    /// the network can prune connections that referenced them.
    pub(crate) fn finish_rebuild(&mut self) -> Vec<Port> {
        let mut dropped = std::mem::take(&mut self.retired_inputs);
        dropped.append(&mut self.retired_outputs);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Literal, PortType, Value};

    fn test_node() -> Node {
        Node::new(1, "n", "test.node", 0.0, 0.0)
    }

    #[test]
    fn ports_keep_declaration_order() {
        let mut node = test_node();
        node.add_input(Port::input("b", PortType::Number));
        node.add_input(Port::input("a", PortType::Number));
        let names: Vec<_> = node.inputs().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn duplicate_names_are_skipped() {
        let mut node = test_node();
        node.add_input(Port::input("v", PortType::Number));
        node.add_input(Port::input("v", PortType::String));
        assert_eq!(node.inputs().len(), 1);
        assert_eq!(node.input("v").map(|p| p.port_type()), Some(PortType::Number));
    }

    #[test]
    fn in_and_out_names_are_independent() {
        let mut node = test_node();
        node.add_input(Port::input("value", PortType::Number));
        node.add_output(Port::output("value", PortType::Number));
        assert!(node.input("value").is_some());
        assert!(node.output("value").is_some());
    }

    #[test]
    fn rebuild_revives_overridden_ports() {
        let mut node = test_node();
        node.add_input(Port::input("v", PortType::Number));
        node.input_mut("v").unwrap().set_literal(Literal::Number(9.0));

        node.begin_rebuild();
        node.add_input(Port::input("v", PortType::Number));
        let dropped = node.finish_rebuild();

        assert!(dropped.is_empty());
        assert_eq!(node.input("v").map(|p| p.computed().clone()), Some(Literal::Number(9.0)));
    }

    #[test]
    fn rebuild_resets_untouched_defaults_to_new_declaration() {
        let mut node = test_node();
        node.add_input(Port::input("v", PortType::Number).with_default(Literal::Number(1.0)));

        node.begin_rebuild();
        node.add_input(Port::input("v", PortType::Number).with_default(Literal::Number(2.0)));
        node.finish_rebuild();

        assert_eq!(node.input("v").map(|p| p.computed().clone()), Some(Literal::Number(2.0)));
    }

    #[test]
    fn rebuild_drops_ports_on_type_change() {
        let mut node = test_node();
        node.add_input(Port::input("v", PortType::Number));
        node.input_mut("v").unwrap().set_literal(Literal::Number(9.0));

        node.begin_rebuild();
        node.add_input(Port::input("v", PortType::String));
        node.finish_rebuild();

        assert_eq!(node.input("v").map(|p| p.value().clone()), Some(Value::Literal(Literal::String(String::new()))));
    }

    #[test]
    fn rebuild_reports_undeclared_ports() {
        let mut node = test_node();
        node.add_input(Port::input("keep", PortType::Number));
        node.add_input(Port::input("gone", PortType::Number));

        node.begin_rebuild();
        node.add_input(Port::input("keep", PortType::Number));
        let dropped = node.finish_rebuild();

        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name(), "gone");
    }
}
