//! The capability interface node content implements.
//!
//! A node type's logic is a [`Behavior`]: `setup` declares the node's ports
//! and flags, and the optional lifecycle hooks run it. Compiled built-ins
//! implement the trait directly; project-level scripted types go through
//! [`crate::script::ScriptBehavior`], which adapts a Steel program onto the
//! same interface.

use crate::node::Node;
use crate::value::{Color, Literal, Point};

/// Errors surfaced by node content hooks. Content is arbitrary, so any
/// error type goes; the network logs these and keeps running.
pub type HookError = Box<dyn std::error::Error>;

/// The logic unit installed on a node by its type.
pub trait Behavior {
    /// Declare the node's ports and flags against a fresh (or rebuilding)
    /// node. Failures are caught by the network; ports declared before the
    /// failure remain.
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError>;

    /// Whether this behavior implements [`Behavior::render`]. The scheduler
    /// skips dirty nodes whose behavior does not render.
    fn renders(&self) -> bool {
        false
    }

    /// One-shot initialization when the network starts or the node joins a
    /// running network.
    fn start(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Recompute outputs from the resolved inputs. Writes are staged on the
    /// context and only land on the node if this returns `Ok`.
    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// Tear down resources acquired at start.
    fn stop(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    /// Rewind logical time without releasing resources.
    fn reset(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

/// Everything a render hook can see: the owning node, its resolved input
/// values, the frame clock, and a staging buffer for output writes.
pub struct RenderCtx<'a> {
    node: &'a Node,
    inputs: Vec<Literal>,
    received: Vec<bool>,
    outputs: Vec<(String, Literal)>,
    frame: u64,
    time: f64,
    now: f64,
}

impl<'a> RenderCtx<'a> {
    pub(crate) fn new(
        node: &'a Node,
        inputs: Vec<Literal>,
        received: Vec<bool>,
        frame: u64,
        time: f64,
        now: f64,
    ) -> Self {
        Self {
            node,
            inputs,
            received,
            outputs: Vec::new(),
            frame,
            time,
            now,
        }
    }

    /// The node being rendered. Port metadata only; writes go through
    /// [`RenderCtx::set_output`].
    pub fn node(&self) -> &Node {
        self.node
    }

    /// The 1-based frame counter.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Seconds since the network started.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Wall-clock timestamp in seconds since the Unix epoch.
    pub fn now(&self) -> f64 {
        self.now
    }

    fn input_index(&self, name: &str) -> Option<usize> {
        self.node.inputs().iter().position(|p| p.name() == name)
    }

    /// The resolved effective value of the named input, if declared.
    pub fn input(&self, name: &str) -> Option<&Literal> {
        self.inputs.get(self.input_index(name)?)
    }

    /// Whether the named trigger input received a pulse this frame.
    pub fn triggered(&self, name: &str) -> bool {
        self.input_index(name)
            .and_then(|ix| self.received.get(ix).copied())
            .unwrap_or(false)
    }

    /// The named number input, or `0.0` if missing or mistyped. A miss is
    /// a content bug; it is logged at debug level rather than failing the
    /// hook.
    pub fn number(&self, name: &str) -> f64 {
        match self.input(name).and_then(Literal::as_number) {
            Some(n) => n,
            None => {
                log::debug!("node {}: no number input `{name}`", self.node.id());
                0.0
            }
        }
    }

    /// The named boolean input, or `false` if missing or mistyped.
    pub fn boolean(&self, name: &str) -> bool {
        match self.input(name).and_then(Literal::as_boolean) {
            Some(b) => b,
            None => {
                log::debug!("node {}: no boolean input `{name}`", self.node.id());
                false
            }
        }
    }

    /// The named string-like input (string, choice or path), or `""`.
    pub fn string(&self, name: &str) -> String {
        match self.input(name).and_then(Literal::as_str) {
            Some(s) => s.to_string(),
            None => {
                log::debug!("node {}: no string input `{name}`", self.node.id());
                String::new()
            }
        }
    }

    /// The named point input, or the origin.
    pub fn point(&self, name: &str) -> Point {
        self.input(name).and_then(Literal::as_point).unwrap_or_default()
    }

    /// The named color input, or opaque black.
    pub fn color(&self, name: &str) -> Color {
        self.input(name).and_then(Literal::as_color).unwrap_or_default()
    }

    /// Stage a write to the named output port. Committed only if the hook
    /// returns `Ok`; a name or type mismatch is dropped with a warning at
    /// commit time.
    pub fn set_output(&mut self, name: impl Into<String>, value: Literal) {
        self.outputs.push((name.into(), value));
    }

    pub(crate) fn into_outputs(self) -> Vec<(String, Literal)> {
        self.outputs
    }
}

/// Apply a hook's staged writes to the node's output ports.
pub(crate) fn commit_outputs(node: &mut Node, staged: Vec<(String, Literal)>) {
    let id = node.id();
    for (name, value) in staged {
        match node.output_mut(&name) {
            Some(port) if port.port_type() == value.port_type() => port.set_computed(value),
            Some(port) => log::warn!(
                "node {id}: output `{name}` is {}, dropping {} write",
                port.port_type(),
                value.port_type(),
            ),
            None => log::warn!("node {id}: no output port `{name}`"),
        }
    }
}
