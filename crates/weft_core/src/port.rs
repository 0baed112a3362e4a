//! Named, typed attachment points on nodes.

use crate::value::{Literal, PortType, Value};

/// Which side of a node a port sits on.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    In,
    Out,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "input"),
            Self::Out => write!(f, "output"),
        }
    }
}

/// A named, typed attachment point on a node.
///
/// The stored [`Value`] is what the user (or a snapshot) assigned; the
/// computed value is what the port effectively carries this frame, i.e. the
/// last expression result or the last value propagated from upstream.
#[derive(Clone, Debug)]
pub struct Port {
    name: String,
    direction: Direction,
    ty: PortType,
    value: Value,
    default: Literal,
    computed: Literal,
    error: Option<String>,
    received: bool,
    min: Option<f64>,
    max: Option<f64>,
    step: Option<f64>,
    options: Vec<String>,
}

impl Port {
    fn new(name: impl Into<String>, direction: Direction, ty: PortType) -> Self {
        let default = Literal::default_for(ty);
        Self {
            name: name.into(),
            direction,
            ty,
            value: Value::Literal(default.clone()),
            computed: default.clone(),
            default,
            error: None,
            received: false,
            min: None,
            max: None,
            step: None,
            options: Vec::new(),
        }
    }

    /// Declare an input port of the given type.
    pub fn input(name: impl Into<String>, ty: PortType) -> Self {
        Self::new(name, Direction::In, ty)
    }

    /// Declare an output port of the given type.
    pub fn output(name: impl Into<String>, ty: PortType) -> Self {
        Self::new(name, Direction::Out, ty)
    }

    /// Override the declared default. The default must match the port type;
    /// a mismatched literal is ignored with a warning.
    pub fn with_default(mut self, default: Literal) -> Self {
        if default.port_type() == self.ty {
            self.value = Value::Literal(default.clone());
            self.computed = default.clone();
            self.default = default;
        } else {
            log::warn!(
                "default for port `{}` is {}, expected {}",
                self.name,
                default.port_type(),
                self.ty,
            );
        }
        self
    }

    /// Declare the numeric range editors should offer for this port.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Declare the editor step increment. Advisory only.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    /// Declare the option set for a choice port. The first option becomes
    /// the default unless one was declared explicitly.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        if let Literal::Choice(current) = &self.default {
            if current.is_empty() {
                if let Some(first) = self.options.first() {
                    let default = Literal::Choice(first.clone());
                    self.value = Value::Literal(default.clone());
                    self.computed = default.clone();
                    self.default = default;
                }
            }
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn port_type(&self) -> PortType {
        self.ty
    }

    /// The stored content: the assigned literal or expression text.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn default_value(&self) -> &Literal {
        &self.default
    }

    /// The effective value visible to readers this frame.
    pub fn computed(&self) -> &Literal {
        &self.computed
    }

    /// The failure attached by the most recent expression evaluation, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn step(&self) -> Option<f64> {
        self.step
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Whether the stored value is the untouched declared default.
    pub fn is_default(&self) -> bool {
        matches!(&self.value, Value::Literal(v) if *v == self.default)
    }

    /// Clamp a number literal to the declared range, when one exists.
    pub(crate) fn clamped(&self, value: Literal) -> Literal {
        match value {
            Literal::Number(n) => {
                let n = self.min.map_or(n, |min| n.max(min));
                let n = self.max.map_or(n, |max| n.min(max));
                Literal::Number(n)
            }
            other => other,
        }
    }

    /// Assign a literal, clearing any expression. The caller has already
    /// checked the literal against the port type.
    pub(crate) fn set_literal(&mut self, value: Literal) {
        if self.ty == PortType::Trigger {
            self.received = true;
        }
        self.computed = value.clone();
        self.value = Value::Literal(value);
        self.error = None;
    }

    /// Assign expression text, clearing any literal. The previous computed
    /// value remains visible until the expression first evaluates.
    pub(crate) fn set_expression(&mut self, text: impl Into<String>) {
        self.value = Value::Expression(text.into());
        self.error = None;
    }

    /// Write the effective value directly: the propagation path for values
    /// arriving from upstream, and the render path for output ports.
    pub(crate) fn set_computed(&mut self, value: Literal) {
        if self.ty == PortType::Trigger {
            self.received = true;
            self.computed = Literal::Trigger;
            return;
        }
        if value.port_type() == self.ty {
            self.computed = value;
        } else {
            log::warn!(
                "port `{}` is {}, ignoring incoming {} value",
                self.name,
                self.ty,
                value.port_type(),
            );
        }
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
    }

    /// Whether a pulse arrived since the flag was last consumed.
    pub(crate) fn received(&self) -> bool {
        self.received
    }

    /// Consume the pulse flag for this frame.
    pub(crate) fn take_received(&mut self) -> bool {
        std::mem::take(&mut self.received)
    }

    /// Return the port to its declared default, dropping any expression,
    /// override, or attached error.
    pub(crate) fn reset_to_default(&mut self) {
        self.value = Value::Literal(self.default.clone());
        self.computed = self.default.clone();
        self.error = None;
        self.received = false;
    }

    /// Carry the live state of a retiring port into this (re-declared) one.
    /// Metadata (type, default, range, options) stays as newly declared.
    pub(crate) fn adopt_state(&mut self, old: Port) {
        self.value = old.value;
        self.computed = old.computed;
        self.error = old.error;
        self.received = old.received;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_port_holds_its_default() {
        let port = Port::input("radius", PortType::Number).with_default(Literal::Number(5.0));
        assert!(port.is_default());
        assert_eq!(port.computed(), &Literal::Number(5.0));
        assert_eq!(port.value(), &Value::Literal(Literal::Number(5.0)));
    }

    #[test]
    fn mismatched_default_is_ignored() {
        let port = Port::input("radius", PortType::Number)
            .with_default(Literal::String("nope".into()));
        assert_eq!(port.default_value(), &Literal::Number(0.0));
    }

    #[test]
    fn first_option_becomes_choice_default() {
        let port = Port::input("mode", PortType::Choice).with_options(["wrap", "clamp"]);
        assert_eq!(port.default_value(), &Literal::Choice("wrap".into()));
    }

    #[test]
    fn clamps_to_declared_range() {
        let port = Port::input("level", PortType::Number).with_range(0.0, 1.0);
        assert_eq!(port.clamped(Literal::Number(3.0)), Literal::Number(1.0));
        assert_eq!(port.clamped(Literal::Number(-3.0)), Literal::Number(0.0));
        assert_eq!(port.clamped(Literal::Number(0.5)), Literal::Number(0.5));
    }

    #[test]
    fn expression_clears_on_literal_set() {
        let mut port = Port::input("v", PortType::Number);
        port.set_expression("(* 2 2)");
        assert!(port.value().is_expression());
        port.set_literal(Literal::Number(1.0));
        assert!(!port.value().is_expression());
        assert_eq!(port.computed(), &Literal::Number(1.0));
    }

    #[test]
    fn trigger_pulse_is_consumed_once() {
        let mut port = Port::input("fire", PortType::Trigger);
        port.set_computed(Literal::Trigger);
        assert!(port.take_received());
        assert!(!port.take_received());
    }
}
