//! The network: the aggregate root of the engine.
//!
//! A [`Network`] owns the node arena, the connection list, project-level
//! node types, settings and the derived [`DependencyGraph`], and drives
//! the per-frame execution pass. Structural edits rebuild the dependency
//! graph from scratch rather than patching it.
//!
//! Failures follow a fixed taxonomy. Structural problems while loading a
//! snapshot (unknown types, dangling connections, bad stored values)
//! become [`Warning`]s and loading continues. Behavior hooks that fail
//! are logged against the owning node and treated as having had no
//! effect. Expression failures are attached to the reading port, which
//! keeps its previous value. Only malformed snapshots and dependency
//! cycles abort an operation.

use crate::behavior::{self, Behavior, RenderCtx};
use crate::context::ExpressionContext;
use crate::deps::{CycleError, DependencyGraph};
use crate::expr::Evaluator;
use crate::library::{Library, NodeType, PROJECT_NAMESPACE, TypeSource};
use crate::node::{Id, Node};
use crate::port::{Direction, Port};
use crate::script::ScriptBehavior;
use crate::snapshot::{
    self, ConnectionSnapshot, NodeSnapshot, PortValueSnapshot, Snapshot, SnapshotError,
    TypeSnapshot, TypeSourceSnapshot,
};
use crate::value::{Literal, PortType, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// A directed edge from one node's out-port to another node's in-port.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Connection {
    pub out_node: Id,
    pub out_port: String,
    pub in_node: Id,
    pub in_port: String,
}

impl Connection {
    pub fn new(
        out_node: Id,
        out_port: impl Into<String>,
        in_node: Id,
        in_port: impl Into<String>,
    ) -> Self {
        Self {
            out_node,
            out_port: out_port.into(),
            in_node,
            in_port: in_port.into(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.out_node, self.out_port, self.in_node, self.in_port
        )
    }
}

/// A non-fatal problem found while loading or editing. The graph keeps
/// whatever could be salvaged.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Warning {
    #[error("unknown node type `{type_id}` for node {node}")]
    UnknownType { node: Id, type_id: String },
    #[error("node id {requested} is already taken, created node {assigned} instead")]
    IdTaken { requested: Id, assigned: Id },
    #[error("setup failed for node {node}: {message}")]
    SetupFailed { node: Id, message: String },
    #[error("node {node} has no port `{port}`")]
    UnknownPort { node: Id, port: String },
    #[error("stored value for `{port}` on node {node} does not decode as its port type")]
    ValueMismatch { node: Id, port: String },
    #[error("dropped dangling connection {connection}")]
    Dangling { connection: Connection },
    #[error("dropped incompatible connection {connection}")]
    Incompatible { connection: Connection },
    #[error("port `{port}` on node {node} already had an incoming connection; replaced")]
    DuplicateIncoming { node: Id, port: String },
    #[error("port `{port}` was removed from node {node}; its connections were dropped")]
    PortRemoved { node: Id, port: String },
    #[error("snapshot type `{type_id}` collides with an existing type; skipped")]
    TypeCollision { type_id: String },
    #[error("snapshot type `{type_id}` is outside the project namespace; skipped")]
    ForeignType { type_id: String },
}

/// An edit the network refused.
#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("no node type `{0}` is registered")]
    UnknownType(String),
    #[error("no node {0} in the network")]
    UnknownNode(Id),
    #[error("node {node} has no {direction} port `{port}`")]
    UnknownPort {
        node: Id,
        direction: Direction,
        port: String,
    },
    #[error("expected a {expected} value, found {found}")]
    TypeMismatch {
        expected: PortType,
        found: PortType,
    },
    #[error("cannot connect {connection}: a {out} output cannot feed a {input} input")]
    Incompatible {
        connection: Connection,
        out: PortType,
        input: PortType,
    },
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error("a node type `{0}` already exists")]
    TypeExists(String),
    #[error("`{0}` is not an editable project type")]
    NotProject(String),
    #[error("expressions can only drive input ports")]
    ExpressionOnOutput,
}

/// A change notification, queued per mutation and handed out through
/// [`Network::drain_events`]. Purely observational.
#[derive(Clone, Debug, PartialEq)]
pub enum NetworkEvent {
    NodeAdded(Id),
    NodeRemoved(Id),
    NodeChanged(Id),
    Connected(Connection),
    Disconnected(Connection),
    ValueChanged { node: Id, port: String },
    TypeAdded(String),
    TypeChanged(String),
}

pub struct Network {
    nodes: Vec<Node>,
    index: HashMap<Id, usize>,
    connections: Vec<Connection>,
    /// Project-level node types. Built-ins live in `library`.
    types: Vec<NodeType>,
    settings: BTreeMap<String, serde_json::Value>,
    library: Library,
    /// Behaviors live beside the arena rather than inside [`Node`] so a
    /// hook can take `&mut self` while reading its node.
    behaviors: HashMap<Id, Box<dyn Behavior>>,
    deps: DependencyGraph,
    evaluator: Evaluator,
    context: ExpressionContext,
    events: VecDeque<NetworkEvent>,
    next_id: Id,
    running: bool,
    started_at: Option<Instant>,
}

impl Network {
    /// An empty network resolving node types against `library`.
    pub fn new(library: Library) -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            connections: Vec::new(),
            types: Vec::new(),
            settings: BTreeMap::new(),
            library,
            behaviors: HashMap::new(),
            deps: DependencyGraph::default(),
            evaluator: Evaluator::new(),
            context: ExpressionContext::new(),
            events: VecDeque::new(),
            next_id: 1,
            running: false,
            started_at: None,
        }
    }

    /// All nodes, in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: Id) -> Option<&Node> {
        self.index.get(&id).map(|&ix| &self.nodes[ix])
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Project-level node types carried by this network.
    pub fn types(&self) -> &[NodeType] {
        &self.types
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Look up a type in the combined catalog. Project types shadow
    /// library entries of the same identifier.
    pub fn node_type(&self, type_id: &str) -> Option<&NodeType> {
        self.types
            .iter()
            .find(|t| t.type_id == type_id)
            .or_else(|| self.library.node_type(type_id))
    }

    /// The current execution order, producers before consumers.
    pub fn render_order(&self) -> &[Id] {
        self.deps.order()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn context(&self) -> &ExpressionContext {
        &self.context
    }

    /// Mutable access for injecting host values visible to expressions.
    pub fn context_mut(&mut self) -> &mut ExpressionContext {
        &mut self.context
    }

    pub fn settings(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.settings.get(key)
    }

    pub fn set_setting(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.settings.insert(key.into(), value);
    }

    /// Hand out (and clear) the accumulated change notifications.
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.events.drain(..).collect()
    }

    // ------------------------------------------------------------------
    // Node management
    // ------------------------------------------------------------------

    /// Instantiate a node of the given type at the origin.
    pub fn create_node(&mut self, type_id: &str) -> Result<Id, NetworkError> {
        self.create_node_at(type_id, 0.0, 0.0)
    }

    /// Instantiate a node of the given type. The type's setup declares
    /// the ports; a setup failure is logged and leaves the node in
    /// whatever partial state was reached. If the network is running the
    /// new node starts immediately.
    pub fn create_node_at(&mut self, type_id: &str, x: f64, y: f64) -> Result<Id, NetworkError> {
        let mut warnings = Vec::new();
        let id = self.spawn(type_id, None, x, y, &mut warnings)?;
        self.rebuild_deps();
        Ok(id)
    }

    /// Relabel a node. Names are display labels, not identity.
    pub fn set_node_name(&mut self, id: Id, name: &str) -> Result<(), NetworkError> {
        let ix = *self.index.get(&id).ok_or(NetworkError::UnknownNode(id))?;
        self.nodes[ix].set_name(name);
        self.events.push_back(NetworkEvent::NodeChanged(id));
        Ok(())
    }

    /// Move a node on the editor canvas. Does not dirty anything.
    pub fn set_node_position(&mut self, id: Id, x: f64, y: f64) -> Result<(), NetworkError> {
        let ix = *self.index.get(&id).ok_or(NetworkError::UnknownNode(id))?;
        self.nodes[ix].set_position(x, y);
        self.events.push_back(NetworkEvent::NodeChanged(id));
        Ok(())
    }

    /// Remove nodes and every connection touching them. In-ports that
    /// lose their feed reset to their defaults. Ids that do not exist
    /// are ignored.
    pub fn delete_nodes(&mut self, ids: &[Id]) {
        let victims: HashSet<Id> = ids
            .iter()
            .copied()
            .filter(|id| self.index.contains_key(id))
            .collect();
        if victims.is_empty() {
            return;
        }
        let ordered: Vec<Id> = self
            .nodes
            .iter()
            .map(Node::id)
            .filter(|id| victims.contains(id))
            .collect();
        if self.running {
            for &id in &ordered {
                if let Some(b) = self.behaviors.get_mut(&id) {
                    if let Err(e) = b.stop() {
                        log::error!("node {id} stop failed: {e}");
                    }
                }
            }
        }

        let touches =
            |c: &Connection| victims.contains(&c.out_node) || victims.contains(&c.in_node);
        let removed: Vec<Connection> = self.connections.iter().filter(|c| touches(c)).cloned().collect();
        self.connections.retain(|c| !touches(c));
        for connection in &removed {
            if victims.contains(&connection.in_node) {
                continue;
            }
            if let Some(&ix) = self.index.get(&connection.in_node) {
                if let Some(port) = self.nodes[ix].input_mut(&connection.in_port) {
                    port.reset_to_default();
                }
            }
        }

        self.nodes.retain(|n| !victims.contains(&n.id()));
        self.reindex();
        for id in &victims {
            self.behaviors.remove(id);
        }
        self.rebuild_deps();

        let orphaned: Vec<Id> = removed
            .iter()
            .filter(|c| !victims.contains(&c.in_node))
            .map(|c| c.in_node)
            .collect();
        self.flood_dirty(orphaned);
        for connection in removed {
            self.events.push_back(NetworkEvent::Disconnected(connection));
        }
        for id in ordered {
            self.events.push_back(NetworkEvent::NodeRemoved(id));
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Wire an out-port to an in-port. Replaces any connection already
    /// terminating at the in-port, refuses self-loops and edges that
    /// would close a cycle, and marks the source node dirty so the new
    /// edge takes effect next frame.
    ///
    /// Only identical port types connect, except that any out-port may
    /// feed a trigger in-port (the arriving value acts as a pulse).
    pub fn connect(
        &mut self,
        out_node: Id,
        out_port: &str,
        in_node: Id,
        in_port: &str,
    ) -> Result<(), NetworkError> {
        let connection = Connection::new(out_node, out_port, in_node, in_port);
        self.validate_connection(&connection)?;
        if self.connections.contains(&connection) {
            return Ok(());
        }
        if self.deps.would_cycle(out_node, in_node) {
            return Err(CycleError { node: in_node }.into());
        }
        if let Some(ix) = self
            .connections
            .iter()
            .position(|c| c.in_node == in_node && c.in_port == in_port)
        {
            let previous = self.connections.remove(ix);
            self.events.push_back(NetworkEvent::Disconnected(previous));
        }
        self.connections.push(connection.clone());
        self.rebuild_deps();
        self.flood_dirty(vec![out_node]);
        self.events.push_back(NetworkEvent::Connected(connection));
        Ok(())
    }

    /// Remove the connection feeding the named in-port, if any, and
    /// reset the port to its declared default.
    pub fn disconnect(&mut self, in_node: Id, in_port: &str) -> Result<(), NetworkError> {
        let node_ix = *self
            .index
            .get(&in_node)
            .ok_or(NetworkError::UnknownNode(in_node))?;
        if self.nodes[node_ix].input(in_port).is_none() {
            return Err(NetworkError::UnknownPort {
                node: in_node,
                direction: Direction::In,
                port: in_port.to_string(),
            });
        }
        let Some(ix) = self
            .connections
            .iter()
            .position(|c| c.in_node == in_node && c.in_port == in_port)
        else {
            return Ok(());
        };
        let connection = self.connections.remove(ix);
        if let Some(port) = self.nodes[node_ix].input_mut(in_port) {
            port.reset_to_default();
        }
        self.rebuild_deps();
        self.flood_dirty(vec![in_node]);
        self.events.push_back(NetworkEvent::Disconnected(connection));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Port values
    // ------------------------------------------------------------------

    /// Assign a literal to an in-port, clearing any expression. The
    /// literal must match the declared port type; numbers clamp to the
    /// declared range.
    pub fn set_port_value(
        &mut self,
        node: Id,
        port: &str,
        value: Literal,
    ) -> Result<(), NetworkError> {
        let ix = *self.index.get(&node).ok_or(NetworkError::UnknownNode(node))?;
        let target =
            self.nodes[ix]
                .input_mut(port)
                .ok_or_else(|| NetworkError::UnknownPort {
                    node,
                    direction: Direction::In,
                    port: port.to_string(),
                })?;
        if value.port_type() != target.port_type() {
            return Err(NetworkError::TypeMismatch {
                expected: target.port_type(),
                found: value.port_type(),
            });
        }
        let value = target.clamped(value);
        target.set_literal(value);
        self.flood_dirty(vec![node]);
        self.events.push_back(NetworkEvent::ValueChanged {
            node,
            port: port.to_string(),
        });
        Ok(())
    }

    /// Store expression text on an in-port, clearing any literal. The
    /// text is not validated here; evaluation failures surface lazily at
    /// read time, attached to the port.
    pub fn set_port_expression(
        &mut self,
        node: Id,
        port: &str,
        text: &str,
    ) -> Result<(), NetworkError> {
        let ix = *self.index.get(&node).ok_or(NetworkError::UnknownNode(node))?;
        if self.nodes[ix].input(port).is_none() {
            return Err(if self.nodes[ix].output(port).is_some() {
                NetworkError::ExpressionOnOutput
            } else {
                NetworkError::UnknownPort {
                    node,
                    direction: Direction::In,
                    port: port.to_string(),
                }
            });
        }
        if let Some(target) = self.nodes[ix].input_mut(port) {
            target.set_expression(text);
        }
        self.flood_dirty(vec![node]);
        self.events.push_back(NetworkEvent::ValueChanged {
            node,
            port: port.to_string(),
        });
        Ok(())
    }

    /// The effective value of an in-port, as of its last resolution.
    pub fn port_value(&self, node: Id, port: &str) -> Result<&Literal, NetworkError> {
        let n = self.node(node).ok_or(NetworkError::UnknownNode(node))?;
        let p = n.input(port).ok_or_else(|| NetworkError::UnknownPort {
            node,
            direction: Direction::In,
            port: port.to_string(),
        })?;
        Ok(p.computed())
    }

    /// The current value of an out-port.
    pub fn output_value(&self, node: Id, port: &str) -> Result<&Literal, NetworkError> {
        let n = self.node(node).ok_or(NetworkError::UnknownNode(node))?;
        let p = n.output(port).ok_or_else(|| NetworkError::UnknownPort {
            node,
            direction: Direction::Out,
            port: port.to_string(),
        })?;
        Ok(p.computed())
    }

    /// Write an out-port directly and push the value to connected
    /// in-ports immediately, marking everything downstream dirty. The
    /// manual-trigger path for nodes without a render hook.
    pub fn set_output_value(
        &mut self,
        node: Id,
        port: &str,
        value: Literal,
    ) -> Result<(), NetworkError> {
        let ix = *self.index.get(&node).ok_or(NetworkError::UnknownNode(node))?;
        let target =
            self.nodes[ix]
                .output_mut(port)
                .ok_or_else(|| NetworkError::UnknownPort {
                    node,
                    direction: Direction::Out,
                    port: port.to_string(),
                })?;
        if value.port_type() != target.port_type() {
            return Err(NetworkError::TypeMismatch {
                expected: target.port_type(),
                found: value.port_type(),
            });
        }
        target.set_computed(value.clone());
        // The pulse is delivered below, not by the next render pass.
        target.take_received();
        let receivers: Vec<(Id, String)> = self
            .connections
            .iter()
            .filter(|c| c.out_node == node && c.out_port == port)
            .map(|c| (c.in_node, c.in_port.clone()))
            .collect();
        for (in_node, in_port) in receivers {
            if let Some(&in_ix) = self.index.get(&in_node) {
                if let Some(p) = self.nodes[in_ix].input_mut(&in_port) {
                    p.set_computed(value.clone());
                }
            }
        }
        self.flood_dirty(self.deps.downstream(node));
        self.events.push_back(NetworkEvent::ValueChanged {
            node,
            port: port.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dirty marking
    // ------------------------------------------------------------------

    /// Flag a node and everything reachable downstream of it as stale.
    pub fn mark_node_dirty(&mut self, id: Id) -> Result<(), NetworkError> {
        if !self.index.contains_key(&id) {
            return Err(NetworkError::UnknownNode(id));
        }
        self.flood_dirty(vec![id]);
        Ok(())
    }

    /// Flag everything downstream of a node, but not the node itself.
    /// Used when an out-port changed without the node needing to rerun.
    pub fn mark_downstream_dirty(&mut self, id: Id) -> Result<(), NetworkError> {
        if !self.index.contains_key(&id) {
            return Err(NetworkError::UnknownNode(id));
        }
        self.flood_dirty(self.deps.downstream(id));
        Ok(())
    }

    /// Breadth-first dirty marking from the seed set. The visited set
    /// keeps diamonds from being walked twice.
    fn flood_dirty(&mut self, seeds: Vec<Id>) {
        let mut visited: HashSet<Id> = seeds.iter().copied().collect();
        let mut queue: VecDeque<Id> = seeds.into();
        while let Some(id) = queue.pop_front() {
            if let Some(&ix) = self.index.get(&id) {
                self.nodes[ix].set_dirty(true);
            }
            for next in self.deps.downstream(id) {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Runtime
    // ------------------------------------------------------------------

    /// Begin a session: fire every node's start hook in insertion order,
    /// rewind the clock to frame 1 and mark the whole graph for a full
    /// first evaluation. A no-op if already running.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.context.set_clock(1, 0.0, unix_now());
        let ids: Vec<Id> = self.nodes.iter().map(Node::id).collect();
        for id in ids {
            if let Some(b) = self.behaviors.get_mut(&id) {
                if let Err(e) = b.start() {
                    log::error!("node {id} start failed: {e}");
                }
            }
        }
        for node in &mut self.nodes {
            node.set_dirty(true);
        }
        log::info!("network started with {} nodes", self.nodes.len());
    }

    /// End the session: fire every node's stop hook in insertion order.
    /// A no-op if not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let ids: Vec<Id> = self.nodes.iter().map(Node::id).collect();
        for id in ids {
            if let Some(b) = self.behaviors.get_mut(&id) {
                if let Err(e) = b.stop() {
                    log::error!("node {id} stop failed: {e}");
                }
            }
        }
        self.running = false;
        self.started_at = None;
        log::info!("network stopped");
    }

    /// Rewind logical time to frame 1 without stopping: fire reset hooks
    /// and mark the graph for re-evaluation. Resources stay allocated.
    pub fn reset(&mut self) {
        let ids: Vec<Id> = self.nodes.iter().map(Node::id).collect();
        for id in ids {
            if let Some(b) = self.behaviors.get_mut(&id) {
                if let Err(e) = b.reset() {
                    log::error!("node {id} reset failed: {e}");
                }
            }
        }
        if self.running {
            self.started_at = Some(Instant::now());
        }
        self.context.set_clock(1, 0.0, unix_now());
        for node in &mut self.nodes {
            node.set_dirty(true);
        }
    }

    /// One frame: refresh the clock, then walk the execution order and
    /// run every dirty node that renders, propagating each node's output
    /// values to its receivers (which dirties them in turn). Clean nodes
    /// and nodes without a render hook are skipped; their existing
    /// out-port values stay visible downstream. The frame counter
    /// advances once the pass completes.
    pub fn render(&mut self) {
        let time = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let now = unix_now();
        let frame = self.context.frame();
        self.context.set_clock(frame, time, now);
        self.evaluator.install(&self.context);

        let order: Vec<Id> = self.deps.order().to_vec();
        for id in order {
            let Some(&ix) = self.index.get(&id) else {
                continue;
            };
            if !self.nodes[ix].is_dirty() {
                continue;
            }
            if !self.behaviors.get(&id).map(|b| b.renders()).unwrap_or(false) {
                continue;
            }

            let connected: HashSet<String> = self
                .connections
                .iter()
                .filter(|c| c.in_node == id)
                .map(|c| c.in_port.clone())
                .collect();
            let (inputs, received) =
                resolve_inputs(&mut self.nodes[ix], &connected, &mut self.evaluator);
            let Some(b) = self.behaviors.get_mut(&id) else {
                continue;
            };
            let mut ctx = RenderCtx::new(&self.nodes[ix], inputs, received, frame, time, now);
            match b.render(&mut ctx) {
                Ok(()) => {
                    let staged = ctx.into_outputs();
                    behavior::commit_outputs(&mut self.nodes[ix], staged);
                    self.propagate(id, ix);
                    self.nodes[ix].set_dirty(false);
                }
                Err(e) => {
                    log::error!("node {id} ({}) render failed: {e}", self.nodes[ix].name());
                    self.nodes[ix].set_dirty(false);
                }
            }
        }
        self.context.advance_frame();
    }

    /// One animation frame: dirty every time-dependent node, then
    /// render. Their downstream picks up the change through propagation.
    pub fn do_frame(&mut self) {
        let ids: Vec<Id> = self
            .nodes
            .iter()
            .filter(|n| n.is_time_dependent())
            .map(Node::id)
            .collect();
        for id in ids {
            if let Some(&ix) = self.index.get(&id) {
                self.nodes[ix].set_dirty(true);
            }
        }
        self.render();
    }

    /// Copy a freshly rendered node's out-port values into connected
    /// in-ports, dirtying the receivers. Trigger outputs only propagate
    /// when they fired during this invocation.
    fn propagate(&mut self, id: Id, ix: usize) {
        let outgoing: Vec<(String, Id, String)> = self
            .connections
            .iter()
            .filter(|c| c.out_node == id)
            .map(|c| (c.out_port.clone(), c.in_node, c.in_port.clone()))
            .collect();
        for (out_port, in_node, in_port) in outgoing {
            let Some(source) = self.nodes[ix].output(&out_port) else {
                continue;
            };
            if source.port_type() == PortType::Trigger && !source.received() {
                continue;
            }
            let value = source.computed().clone();
            let Some(&in_ix) = self.index.get(&in_node) else {
                continue;
            };
            if let Some(sink) = self.nodes[in_ix].input_mut(&in_port) {
                sink.set_computed(value);
            }
            self.nodes[in_ix].set_dirty(true);
        }
        for port in self.nodes[ix].outputs_mut() {
            if port.port_type() == PortType::Trigger {
                port.take_received();
            }
        }
    }

    // ------------------------------------------------------------------
    // Hot-swap and fork
    // ------------------------------------------------------------------

    /// Replace a project type's behavior source in place and re-setup
    /// every live instance. Instances keep their id, name and position;
    /// ports re-declared under the same name and type keep their values,
    /// and connections survive unless their port vanished.
    pub fn set_node_type_source(
        &mut self,
        type_id: &str,
        source: &str,
    ) -> Result<Vec<Warning>, NetworkError> {
        let Some(tix) = self.types.iter().position(|t| t.type_id == type_id) else {
            return Err(if self.library.contains(type_id) {
                NetworkError::NotProject(type_id.to_string())
            } else {
                NetworkError::UnknownType(type_id.to_string())
            });
        };
        self.types[tix].source = TypeSource::Script(source.to_string());
        self.events
            .push_back(NetworkEvent::TypeChanged(type_id.to_string()));

        let mut warnings = Vec::new();
        let instances: Vec<Id> = self
            .nodes
            .iter()
            .filter(|n| n.type_id() == type_id)
            .map(Node::id)
            .collect();
        for id in instances {
            self.resetup_node(id, source, &mut warnings);
        }
        self.prune_dangling(&mut warnings);
        self.rebuild_deps();
        Ok(warnings)
    }

    /// Re-run setup against the same node instance with a new script.
    fn resetup_node(&mut self, id: Id, source: &str, warnings: &mut Vec<Warning>) {
        let Some(&ix) = self.index.get(&id) else {
            return;
        };
        if self.running {
            if let Some(b) = self.behaviors.get_mut(&id) {
                if let Err(e) = b.stop() {
                    log::error!("node {id} stop failed: {e}");
                }
            }
        }
        let mut b: Box<dyn Behavior> = Box::new(ScriptBehavior::new(source));
        self.nodes[ix].begin_rebuild();
        if let Err(e) = b.setup(&mut self.nodes[ix]) {
            note(
                warnings,
                Warning::SetupFailed {
                    node: id,
                    message: e.to_string(),
                },
            );
        }
        let dropped = self.nodes[ix].finish_rebuild();
        self.drop_connections_for(id, &dropped, warnings);
        if self.running {
            if let Err(e) = b.start() {
                log::error!("node {id} start failed: {e}");
            }
        }
        self.behaviors.insert(id, b);
        self.flood_dirty(vec![id]);
        self.events.push_back(NetworkEvent::NodeChanged(id));
    }

    /// Give a node a different type identity entirely: fresh node, same
    /// id and position. Non-default in-port values carry over where the
    /// new type declares a same-named port of the same type; everything
    /// else is silently dropped. Connections to vanished or re-typed
    /// ports are pruned.
    pub fn change_node_type(
        &mut self,
        id: Id,
        type_id: &str,
    ) -> Result<Vec<Warning>, NetworkError> {
        let ix = *self.index.get(&id).ok_or(NetworkError::UnknownNode(id))?;
        let Some(mut b) = self.instantiate_behavior(type_id) else {
            return Err(NetworkError::UnknownType(type_id.to_string()));
        };
        let mut warnings = Vec::new();
        if self.running {
            if let Some(old) = self.behaviors.get_mut(&id) {
                if let Err(e) = old.stop() {
                    log::error!("node {id} stop failed: {e}");
                }
            }
        }
        let old = &self.nodes[ix];
        let (x, y) = old.position();
        let overrides: Vec<(String, PortType, Value)> = old
            .inputs()
            .iter()
            .filter(|p| !p.is_default())
            .map(|p| (p.name().to_string(), p.port_type(), p.value().clone()))
            .collect();
        let name = self
            .display_name(type_id)
            .unwrap_or_else(|| type_id.to_string());
        let mut node = Node::new(id, name, type_id, x, y);
        if let Err(e) = b.setup(&mut node) {
            note(
                &mut warnings,
                Warning::SetupFailed {
                    node: id,
                    message: e.to_string(),
                },
            );
        }
        for (port, ty, value) in overrides {
            let Some(target) = node.input_mut(&port) else {
                continue;
            };
            if target.port_type() != ty {
                continue;
            }
            match value {
                Value::Literal(literal) => {
                    let literal = target.clamped(literal);
                    target.set_literal(literal);
                }
                Value::Expression(text) => target.set_expression(text),
            }
        }
        self.nodes[ix] = node;
        self.behaviors.insert(id, b);
        self.prune_dangling(&mut warnings);
        if self.running {
            if let Some(b) = self.behaviors.get_mut(&id) {
                if let Err(e) = b.start() {
                    log::error!("node {id} start failed: {e}");
                }
            }
        }
        self.rebuild_deps();
        self.flood_dirty(vec![id]);
        self.events.push_back(NetworkEvent::NodeChanged(id));
        Ok(warnings)
    }

    /// Copy an existing type into the project namespace under a new
    /// identifier. Touches no nodes; migrate instances separately with
    /// [`Network::change_node_type`].
    pub fn fork_node_type(&mut self, type_id: &str, new_type_id: &str) -> Result<(), NetworkError> {
        if !new_type_id.starts_with(PROJECT_NAMESPACE) {
            return Err(NetworkError::NotProject(new_type_id.to_string()));
        }
        if self.type_exists(new_type_id) {
            return Err(NetworkError::TypeExists(new_type_id.to_string()));
        }
        let Some(original) = self.node_type(type_id) else {
            return Err(NetworkError::UnknownType(type_id.to_string()));
        };
        let forked = NodeType {
            type_id: new_type_id.to_string(),
            ..original.clone()
        };
        self.types.push(forked);
        self.events
            .push_back(NetworkEvent::TypeAdded(new_type_id.to_string()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Bulk-load a snapshot into this network: project types, then nodes
    /// with their stored values, then connections, then settings, ending
    /// with a single dependency rebuild. Data problems become warnings;
    /// only a dependency cycle aborts (before any connection lands).
    pub fn parse(&mut self, snapshot: &Snapshot) -> Result<Vec<Warning>, SnapshotError> {
        let mut warnings = Vec::new();

        for ty in &snapshot.types {
            if !ty.type_id.starts_with(PROJECT_NAMESPACE) {
                note(
                    &mut warnings,
                    Warning::ForeignType {
                        type_id: ty.type_id.clone(),
                    },
                );
                continue;
            }
            if self.type_exists(&ty.type_id) {
                note(
                    &mut warnings,
                    Warning::TypeCollision {
                        type_id: ty.type_id.clone(),
                    },
                );
                continue;
            }
            let source = match &ty.source {
                TypeSourceSnapshot::Script(source) => TypeSource::Script(source.clone()),
                TypeSourceSnapshot::Builtin { builtin } => TypeSource::Builtin(builtin.clone()),
            };
            self.types.push(NodeType {
                name: ty.name.clone(),
                type_id: ty.type_id.clone(),
                source,
                description: ty.description.clone(),
            });
            self.events
                .push_back(NetworkEvent::TypeAdded(ty.type_id.clone()));
        }

        // Snapshot ids can collide with existing nodes; connections then
        // need their endpoints translated to the assigned ids.
        let mut remap: HashMap<Id, Id> = HashMap::new();
        for node in &snapshot.nodes {
            let id = match self.spawn(&node.type_id, Some(node.id), node.x, node.y, &mut warnings)
            {
                Ok(id) => id,
                Err(_) => {
                    note(
                        &mut warnings,
                        Warning::UnknownType {
                            node: node.id,
                            type_id: node.type_id.clone(),
                        },
                    );
                    continue;
                }
            };
            if id != node.id {
                remap.insert(node.id, id);
            }
            if let Some(&ix) = self.index.get(&id) {
                self.nodes[ix].set_name(node.name.clone());
            }
            for (port, value) in &node.values {
                self.apply_snapshot_value(id, port, value, &mut warnings);
            }
        }

        let mut added: Vec<Connection> = Vec::new();
        for c in &snapshot.connections {
            let out_node = remap.get(&c.out_node).copied().unwrap_or(c.out_node);
            let in_node = remap.get(&c.in_node).copied().unwrap_or(c.in_node);
            let connection =
                Connection::new(out_node, c.out_port.clone(), in_node, c.in_port.clone());
            match self.validate_connection(&connection) {
                Ok(()) => {}
                Err(NetworkError::Incompatible { .. }) => {
                    note(&mut warnings, Warning::Incompatible { connection });
                    continue;
                }
                Err(_) => {
                    note(&mut warnings, Warning::Dangling { connection });
                    continue;
                }
            }
            let occupied = |list: &[Connection]| {
                list.iter()
                    .position(|x| x.in_node == connection.in_node && x.in_port == connection.in_port)
            };
            if let Some(ix) = occupied(&added) {
                added.remove(ix);
                note(
                    &mut warnings,
                    Warning::DuplicateIncoming {
                        node: connection.in_node,
                        port: connection.in_port.clone(),
                    },
                );
            } else if let Some(ix) = occupied(&self.connections) {
                let previous = self.connections.remove(ix);
                self.events.push_back(NetworkEvent::Disconnected(previous));
                note(
                    &mut warnings,
                    Warning::DuplicateIncoming {
                        node: connection.in_node,
                        port: connection.in_port.clone(),
                    },
                );
            }
            added.push(connection);
        }

        let edges: Vec<(Id, Id)> = self
            .connections
            .iter()
            .chain(added.iter())
            .map(|c| (c.out_node, c.in_node))
            .collect();
        let deps = match DependencyGraph::build(self.nodes.iter().map(Node::id), edges) {
            Ok(deps) => deps,
            Err(cycle) => {
                // The spawned nodes stay; the scheduler still needs an
                // order covering them, minus the rejected edges.
                self.rebuild_deps();
                return Err(cycle.into());
            }
        };
        self.deps = deps;
        for connection in added {
            self.events
                .push_back(NetworkEvent::Connected(connection.clone()));
            self.connections.push(connection);
        }

        self.settings.extend(
            snapshot
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        log::info!(
            "loaded {} nodes and {} connections ({} warnings)",
            snapshot.nodes.len(),
            snapshot.connections.len(),
            warnings.len(),
        );
        Ok(warnings)
    }

    /// Produce the complete serialized form of this network. In-port
    /// overrides are included only when they carry information: an
    /// expression always, a literal only when it differs from the
    /// declared default and the port is unconnected. Defaults are
    /// recomputed from setup on load, never stored.
    pub fn serialize(&self) -> Snapshot {
        let connected: HashSet<(Id, &str)> = self
            .connections
            .iter()
            .map(|c| (c.in_node, c.in_port.as_str()))
            .collect();
        let nodes = self
            .nodes
            .iter()
            .map(|node| {
                let mut values = BTreeMap::new();
                for port in node.inputs() {
                    match port.value() {
                        Value::Expression(text) => {
                            values.insert(
                                port.name().to_string(),
                                PortValueSnapshot::Expression {
                                    expression: text.clone(),
                                },
                            );
                        }
                        Value::Literal(literal) => {
                            if connected.contains(&(node.id(), port.name())) || port.is_default() {
                                continue;
                            }
                            if let Some(value) = snapshot::literal_to_json(literal) {
                                values.insert(
                                    port.name().to_string(),
                                    PortValueSnapshot::Value { value },
                                );
                            }
                        }
                    }
                }
                let (x, y) = node.position();
                NodeSnapshot {
                    id: node.id(),
                    name: node.name().to_string(),
                    type_id: node.type_id().to_string(),
                    x,
                    y,
                    values,
                }
            })
            .collect();
        let connections = self
            .connections
            .iter()
            .map(|c| ConnectionSnapshot {
                out_node: c.out_node,
                out_port: c.out_port.clone(),
                in_node: c.in_node,
                in_port: c.in_port.clone(),
            })
            .collect();
        let types = self
            .types
            .iter()
            .map(|t| TypeSnapshot {
                name: t.name.clone(),
                type_id: t.type_id.clone(),
                source: match &t.source {
                    TypeSource::Script(source) => TypeSourceSnapshot::Script(source.clone()),
                    TypeSource::Builtin(builtin) => TypeSourceSnapshot::Builtin {
                        builtin: builtin.clone(),
                    },
                },
                description: t.description.clone(),
            })
            .collect();
        Snapshot {
            version: snapshot::VERSION,
            nodes,
            connections,
            types,
            settings: self.settings.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn alloc_id(&mut self) -> Id {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(ix, n)| (n.id(), ix))
            .collect();
    }

    fn type_exists(&self, type_id: &str) -> bool {
        self.library.contains(type_id) || self.types.iter().any(|t| t.type_id == type_id)
    }

    fn display_name(&self, type_id: &str) -> Option<String> {
        self.node_type(type_id).map(|t| t.name.clone())
    }

    /// Build a behavior for the given type. Project types shadow library
    /// entries; a project fork of a built-in resolves back through the
    /// library's factory.
    fn instantiate_behavior(&self, type_id: &str) -> Option<Box<dyn Behavior>> {
        if let Some(ty) = self.types.iter().find(|t| t.type_id == type_id) {
            return match &ty.source {
                TypeSource::Script(source) => Some(Box::new(ScriptBehavior::new(source.clone()))),
                TypeSource::Builtin(builtin) => self.library.instantiate(builtin),
            };
        }
        self.library.instantiate(type_id)
    }

    /// Instantiate and set up one node. Does not rebuild the dependency
    /// graph; the caller batches that.
    fn spawn(
        &mut self,
        type_id: &str,
        requested: Option<Id>,
        x: f64,
        y: f64,
        warnings: &mut Vec<Warning>,
    ) -> Result<Id, NetworkError> {
        let Some(mut b) = self.instantiate_behavior(type_id) else {
            return Err(NetworkError::UnknownType(type_id.to_string()));
        };
        let name = self
            .display_name(type_id)
            .unwrap_or_else(|| type_id.to_string());
        let id = match requested {
            Some(requested) if !self.index.contains_key(&requested) => {
                self.next_id = self.next_id.max(requested.saturating_add(1));
                requested
            }
            Some(requested) => {
                let assigned = self.alloc_id();
                note(warnings, Warning::IdTaken { requested, assigned });
                assigned
            }
            None => self.alloc_id(),
        };
        let mut node = Node::new(id, name, type_id, x, y);
        if let Err(e) = b.setup(&mut node) {
            note(
                warnings,
                Warning::SetupFailed {
                    node: id,
                    message: e.to_string(),
                },
            );
        }
        if self.running {
            if let Err(e) = b.start() {
                log::error!("node {id} start failed: {e}");
            }
        }
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);
        self.behaviors.insert(id, b);
        self.events.push_back(NetworkEvent::NodeAdded(id));
        Ok(id)
    }

    fn apply_snapshot_value(
        &mut self,
        id: Id,
        port: &str,
        value: &PortValueSnapshot,
        warnings: &mut Vec<Warning>,
    ) {
        let Some(&ix) = self.index.get(&id) else {
            return;
        };
        let mut problem = None;
        if let Some(target) = self.nodes[ix].input_mut(port) {
            match value {
                PortValueSnapshot::Expression { expression } => {
                    target.set_expression(expression.clone());
                }
                PortValueSnapshot::Value { value } => {
                    match snapshot::literal_from_json(value, target.port_type()) {
                        Some(literal) => {
                            let literal = target.clamped(literal);
                            target.set_literal(literal);
                        }
                        None => {
                            problem = Some(Warning::ValueMismatch {
                                node: id,
                                port: port.to_string(),
                            });
                        }
                    }
                }
            }
        } else {
            problem = Some(Warning::UnknownPort {
                node: id,
                port: port.to_string(),
            });
        }
        if let Some(warning) = problem {
            note(warnings, warning);
        }
    }

    fn validate_connection(&self, connection: &Connection) -> Result<(), NetworkError> {
        let out_node = self
            .node(connection.out_node)
            .ok_or(NetworkError::UnknownNode(connection.out_node))?;
        let out_port =
            out_node
                .output(&connection.out_port)
                .ok_or_else(|| NetworkError::UnknownPort {
                    node: connection.out_node,
                    direction: Direction::Out,
                    port: connection.out_port.clone(),
                })?;
        let in_node = self
            .node(connection.in_node)
            .ok_or(NetworkError::UnknownNode(connection.in_node))?;
        let in_port =
            in_node
                .input(&connection.in_port)
                .ok_or_else(|| NetworkError::UnknownPort {
                    node: connection.in_node,
                    direction: Direction::In,
                    port: connection.in_port.clone(),
                })?;
        let compatible = out_port.port_type() == in_port.port_type()
            || in_port.port_type() == PortType::Trigger;
        if !compatible {
            return Err(NetworkError::Incompatible {
                connection: connection.clone(),
                out: out_port.port_type(),
                input: in_port.port_type(),
            });
        }
        Ok(())
    }

    /// Drop every connection that no longer validates, resetting the
    /// surviving in-ports it fed.
    fn prune_dangling(&mut self, warnings: &mut Vec<Warning>) {
        let dangling: Vec<Connection> = self
            .connections
            .iter()
            .filter(|c| self.validate_connection(c).is_err())
            .cloned()
            .collect();
        if dangling.is_empty() {
            return;
        }
        self.connections.retain(|c| !dangling.contains(c));
        for connection in dangling {
            note(
                warnings,
                Warning::Dangling {
                    connection: connection.clone(),
                },
            );
            if let Some(&ix) = self.index.get(&connection.in_node) {
                if let Some(p) = self.nodes[ix].input_mut(&connection.in_port) {
                    p.reset_to_default();
                }
                self.nodes[ix].set_dirty(true);
            }
            self.events.push_back(NetworkEvent::Disconnected(connection));
        }
    }

    /// Remove the connections of ports a hot-swap dropped.
    fn drop_connections_for(&mut self, id: Id, dropped: &[Port], warnings: &mut Vec<Warning>) {
        for port in dropped {
            let name = port.name();
            let removed: Vec<Connection> = self
                .connections
                .iter()
                .filter(|c| match port.direction() {
                    Direction::In => c.in_node == id && c.in_port == name,
                    Direction::Out => c.out_node == id && c.out_port == name,
                })
                .cloned()
                .collect();
            if removed.is_empty() {
                continue;
            }
            self.connections.retain(|c| !removed.contains(c));
            note(
                warnings,
                Warning::PortRemoved {
                    node: id,
                    port: name.to_string(),
                },
            );
            for connection in removed {
                if connection.in_node != id {
                    if let Some(&ix) = self.index.get(&connection.in_node) {
                        if let Some(p) = self.nodes[ix].input_mut(&connection.in_port) {
                            p.reset_to_default();
                        }
                        self.nodes[ix].set_dirty(true);
                    }
                }
                self.events.push_back(NetworkEvent::Disconnected(connection));
            }
        }
    }

    fn try_rebuild_deps(&mut self) -> Result<(), CycleError> {
        self.deps = DependencyGraph::build(
            self.nodes.iter().map(Node::id),
            self.connections.iter().map(|c| (c.out_node, c.in_node)),
        )?;
        Ok(())
    }

    fn rebuild_deps(&mut self) {
        if let Err(e) = self.try_rebuild_deps() {
            // Every caller either removed elements or pre-checked the
            // edge with a reachability probe, so this cannot cycle.
            log::error!("dependency rebuild failed: {e}");
        }
    }
}

/// Resolve a node's effective input values for one render invocation.
/// Unconnected expression ports evaluate here; a failure keeps the
/// port's previous value and attaches the error to the port. Trigger
/// pulses are consumed.
fn resolve_inputs(
    node: &mut Node,
    connected: &HashSet<String>,
    evaluator: &mut Evaluator,
) -> (Vec<Literal>, Vec<bool>) {
    let id = node.id();
    let mut values = Vec::new();
    let mut received = Vec::new();
    for port in node.inputs_mut() {
        received.push(port.take_received());
        if !connected.contains(port.name()) {
            if let Value::Expression(text) = port.value() {
                let text = text.clone();
                match evaluator.eval(&text, port.port_type()) {
                    Ok(value) => {
                        port.set_computed(value);
                        port.clear_error();
                    }
                    Err(e) => {
                        log::warn!("node {id} `{}`: {e}", port.name());
                        port.set_error(e.to_string());
                    }
                }
            }
        }
        values.push(port.computed().clone());
    }
    (values, received)
}

/// Record a warning on the report and the log at once.
fn note(warnings: &mut Vec<Warning>, warning: Warning) {
    log::warn!("{warning}");
    warnings.push(warning);
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
