//! Steel-scripted node behaviors.
//!
//! Project-level node types carry their logic as Steel source. The script
//! declares its ports and optional flags as top-level definitions and its
//! hooks as ordinary functions:
//!
//! ```scheme
//! (define ports
//!   '((in number "value" 0)
//!     (in trigger "go")
//!     (out number "out")))
//!
//! (define time-dependent #f)
//!
//! (define (render inputs)
//!   (hash "out" (- (hash-ref inputs "value"))))
//! ```
//!
//! Each port entry is `(direction type "name")` with an optional default
//! and, for choice ports, an optional option list, e.g.
//! `(in choice "mode" "lerp" ("lerp" "hold"))`. Direction and type tokens
//! may be symbols or strings.
//!
//! `render` receives a hashmap of input port names to values; trigger
//! inputs appear as `#t` when pulsed this frame. It returns a hashmap of
//! output names to values, a bare value when the node has exactly one
//! output, or void to write nothing. Trigger outputs fire when mapped to
//! `#t`. `start`, `stop` and `reset` are optional zero-argument hooks.
//!
//! Each instance runs its own engine, so script globals persist across
//! renders and act as per-node state. Re-running setup (a source edit)
//! replaces the engine and clears that state.

use crate::behavior::{Behavior, HookError, RenderCtx};
use crate::expr;
use crate::node::Node;
use crate::port::{Direction, Port};
use crate::value::{Literal, PortType};
use steel::SteelVal;
use steel::gc::Gc;
use steel::steel_vm::engine::Engine;
use thiserror::Error;

/// A script failed to load or declared itself incorrectly.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ScriptError {
    /// The source failed to parse or its top level failed to run.
    #[error("script failed to load: {0}")]
    Load(String),
    /// The script defines no `ports` list.
    #[error("script does not define `ports`")]
    MissingPorts,
    /// An entry in the `ports` list is not a valid declaration.
    #[error("malformed port declaration: {0}")]
    Port(String),
}

/// Runs a Steel script as a node behavior.
pub struct ScriptBehavior {
    engine: Engine,
    source: String,
    renders: bool,
    has_start: bool,
    has_stop: bool,
    has_reset: bool,
}

impl ScriptBehavior {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            engine: Engine::new_base(),
            source: source.into(),
            renders: false,
            has_start: false,
            has_stop: false,
            has_reset: false,
        }
    }

    fn call(&mut self, hook: &str) -> Result<(), HookError> {
        self.engine.call_function_by_name_with_args(hook, vec![])?;
        Ok(())
    }
}

impl Behavior for ScriptBehavior {
    fn setup(&mut self, node: &mut Node) -> Result<(), HookError> {
        let mut engine = Engine::new_base();
        // Steel resolves free identifiers at load, so the clock globals
        // must exist before the source runs. Render refreshes them.
        engine.register_value("$FRAME", SteelVal::IntV(1));
        engine.register_value("$TIME", SteelVal::NumV(0.0));
        engine.register_value("$NOW", SteelVal::NumV(0.0));
        engine
            .run(self.source.clone())
            .map_err(|e| ScriptError::Load(e.to_string()))?;
        let ports = engine
            .extract_value("ports")
            .map_err(|_| ScriptError::MissingPorts)?;
        for (direction, port) in parse_ports(&ports)? {
            match direction {
                Direction::In => node.add_input(port),
                Direction::Out => node.add_output(port),
            }
        }
        if let Ok(SteelVal::BoolV(true)) = engine.extract_value("time-dependent") {
            node.set_time_dependent(true);
        }
        self.renders = engine.extract_value("render").is_ok();
        self.has_start = engine.extract_value("start").is_ok();
        self.has_stop = engine.extract_value("stop").is_ok();
        self.has_reset = engine.extract_value("reset").is_ok();
        self.engine = engine;
        Ok(())
    }

    fn renders(&self) -> bool {
        self.renders
    }

    fn start(&mut self) -> Result<(), HookError> {
        if self.has_start {
            self.call("start")?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HookError> {
        if self.has_stop {
            self.call("stop")?;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), HookError> {
        if self.has_reset {
            self.call("reset")?;
        }
        Ok(())
    }

    fn render(&mut self, ctx: &mut RenderCtx) -> Result<(), HookError> {
        let frame: isize = ctx.frame().try_into().unwrap_or(isize::MAX);
        self.engine.register_value("$FRAME", SteelVal::IntV(frame));
        self.engine.register_value("$TIME", SteelVal::NumV(ctx.time()));
        self.engine.register_value("$NOW", SteelVal::NumV(ctx.now()));

        let inputs: Vec<(String, SteelVal)> = ctx
            .node()
            .inputs()
            .iter()
            .map(|port| {
                let value = match port.port_type() {
                    PortType::Trigger => SteelVal::BoolV(ctx.triggered(port.name())),
                    _ => ctx
                        .input(port.name())
                        .map(expr::to_steel)
                        .unwrap_or(SteelVal::Void),
                };
                (port.name().to_string(), value)
            })
            .collect();
        let outputs: Vec<(String, PortType)> = ctx
            .node()
            .outputs()
            .iter()
            .map(|port| (port.name().to_string(), port.port_type()))
            .collect();

        let result = self
            .engine
            .call_function_by_name_with_args("render", vec![hashmap(inputs)])?;
        match result {
            SteelVal::Void => {}
            SteelVal::HashMapV(map) => {
                for (name, ty) in outputs {
                    let Some(value) = map.get(&SteelVal::StringV(name.as_str().into())) else {
                        continue;
                    };
                    if let Some(literal) = coerce_output(ctx.node(), &name, ty, value) {
                        ctx.set_output(name, literal);
                    }
                }
            }
            // A bare value addresses a single output.
            value => match outputs.as_slice() {
                [(name, ty)] => {
                    if let Some(literal) = coerce_output(ctx.node(), name, *ty, &value) {
                        ctx.set_output(name.clone(), literal);
                    }
                }
                _ => log::warn!(
                    "node {}: script returned a bare value but declares {} outputs",
                    ctx.node().id(),
                    outputs.len(),
                ),
            },
        }
        Ok(())
    }
}

/// Coerce one script result entry to the declared output type. Trigger
/// outputs fire on `#t` and stay quiet otherwise.
fn coerce_output(node: &Node, name: &str, ty: PortType, value: &SteelVal) -> Option<Literal> {
    if ty == PortType::Trigger {
        return match value {
            SteelVal::BoolV(true) => Some(Literal::Trigger),
            _ => None,
        };
    }
    match expr::from_steel(value, ty) {
        Ok(literal) => Some(literal),
        Err(e) => {
            log::warn!("node {}: script output `{name}`: {e}", node.id());
            None
        }
    }
}

fn parse_ports(value: &SteelVal) -> Result<Vec<(Direction, Port)>, ScriptError> {
    let SteelVal::ListV(entries) = value else {
        return Err(ScriptError::Port("`ports` must be a list".into()));
    };
    entries.iter().map(parse_port).collect()
}

fn parse_port(entry: &SteelVal) -> Result<(Direction, Port), ScriptError> {
    let SteelVal::ListV(fields) = entry else {
        return Err(ScriptError::Port(format!(
            "expected (direction type \"name\" ...), found {entry}"
        )));
    };
    let fields: Vec<&SteelVal> = fields.iter().collect();
    let [direction, ty, name, rest @ ..] = fields.as_slice() else {
        return Err(ScriptError::Port(
            "expected (direction type \"name\" ...)".into(),
        ));
    };

    let direction = match token(direction)?.as_str() {
        "in" => Direction::In,
        "out" => Direction::Out,
        other => {
            return Err(ScriptError::Port(format!(
                "direction must be `in` or `out`, found `{other}`"
            )));
        }
    };
    let ty = port_type(&token(ty)?)?;
    let SteelVal::StringV(name) = name else {
        return Err(ScriptError::Port("port name must be a string".into()));
    };
    let mut port = match direction {
        Direction::In => Port::input(name.to_string(), ty),
        Direction::Out => Port::output(name.to_string(), ty),
    };
    for field in rest {
        match field {
            SteelVal::ListV(options) => {
                let options: Vec<String> =
                    options.iter().map(token).collect::<Result<_, _>>()?;
                port = port.with_options(options);
            }
            value => {
                let default = expr::from_steel(value, ty)
                    .map_err(|e| ScriptError::Port(format!("default for `{name}`: {e}")))?;
                port = port.with_default(default);
            }
        }
    }
    Ok((direction, port))
}

/// Direction, type and option tokens may be written as symbols or strings.
fn token(value: &SteelVal) -> Result<String, ScriptError> {
    match value {
        SteelVal::SymbolV(s) | SteelVal::StringV(s) => Ok(s.to_string()),
        other => Err(ScriptError::Port(format!("expected a symbol, found {other}"))),
    }
}

fn port_type(token: &str) -> Result<PortType, ScriptError> {
    let ty = match token {
        "trigger" => PortType::Trigger,
        "boolean" => PortType::Boolean,
        "number" => PortType::Number,
        "string" => PortType::String,
        "choice" => PortType::Choice,
        "point" => PortType::Point,
        "color" => PortType::Color,
        "file-path" => PortType::FilePath,
        "dir-path" => PortType::DirPath,
        "object" => PortType::Object,
        "image" => PortType::Image,
        other => {
            return Err(ScriptError::Port(format!("unknown port type `{other}`")));
        }
    };
    Ok(ty)
}

fn hashmap(pairs: Vec<(String, SteelVal)>) -> SteelVal {
    let SteelVal::HashMapV(mut map) = SteelVal::empty_hashmap() else {
        return SteelVal::Void;
    };
    for (key, value) in pairs {
        map = Gc::new(map.update(SteelVal::StringV(key.into()), value)).into();
    }
    SteelVal::HashMapV(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEGATE: &str = r#"
        (define ports
          '((in number "value" 0)
            (out number "out")))
        (define (render inputs)
          (hash "out" (- (hash-ref inputs "value"))))
    "#;

    fn setup(source: &str) -> (Node, ScriptBehavior) {
        let mut node = Node::new(1, "test", "project.test", 0.0, 0.0);
        let mut behavior = ScriptBehavior::new(source);
        behavior.setup(&mut node).unwrap();
        (node, behavior)
    }

    #[test]
    fn setup_declares_ports() {
        let (node, behavior) = setup(NEGATE);
        let input = node.input("value").unwrap();
        assert_eq!(input.port_type(), PortType::Number);
        assert_eq!(input.default_value(), &Literal::Number(0.0));
        assert_eq!(node.output("out").unwrap().port_type(), PortType::Number);
        assert!(behavior.renders());
        assert!(!node.is_time_dependent());
    }

    #[test]
    fn render_maps_outputs_by_name() {
        let (node, mut behavior) = setup(NEGATE);
        let mut ctx = RenderCtx::new(
            &node,
            vec![Literal::Number(42.0)],
            vec![false],
            1,
            0.0,
            0.0,
        );
        behavior.render(&mut ctx).unwrap();
        assert_eq!(
            ctx.into_outputs(),
            vec![("out".to_string(), Literal::Number(-42.0))]
        );
    }

    #[test]
    fn bare_result_addresses_a_single_output() {
        let source = r#"
            (define ports
              '((in number "value" 1)
                (out number "doubled")))
            (define (render inputs)
              (* 2 (hash-ref inputs "value")))
        "#;
        let (node, mut behavior) = setup(source);
        let mut ctx = RenderCtx::new(&node, vec![Literal::Number(3.0)], vec![false], 1, 0.0, 0.0);
        behavior.render(&mut ctx).unwrap();
        assert_eq!(
            ctx.into_outputs(),
            vec![("doubled".to_string(), Literal::Number(6.0))]
        );
    }

    #[test]
    fn globals_persist_between_renders() {
        let source = r#"
            (define ports
              '((in trigger "bump")
                (out number "count")))
            (define count 0)
            (define (render inputs)
              (begin
                (if (hash-ref inputs "bump")
                    (set! count (+ count 1))
                    void)
                (hash "count" count)))
        "#;
        let (node, mut behavior) = setup(source);
        for expected in [1.0, 2.0] {
            let mut ctx = RenderCtx::new(&node, vec![Literal::Trigger], vec![true], 1, 0.0, 0.0);
            behavior.render(&mut ctx).unwrap();
            assert_eq!(
                ctx.into_outputs(),
                vec![("count".to_string(), Literal::Number(expected))]
            );
        }
    }

    #[test]
    fn choice_ports_take_options() {
        let source = r#"
            (define ports
              '((in choice "mode" ("lerp" "hold"))
                (out number "out")))
        "#;
        let (node, behavior) = setup(source);
        let port = node.input("mode").unwrap();
        assert_eq!(port.options(), ["lerp", "hold"]);
        assert_eq!(port.default_value(), &Literal::Choice("lerp".into()));
        assert!(!behavior.renders());
    }

    #[test]
    fn time_dependent_flag_is_honored() {
        let source = r#"
            (define ports '((out number "t")))
            (define time-dependent #t)
            (define (render inputs)
              (hash "t" $TIME))
        "#;
        let (node, _) = setup(source);
        assert!(node.is_time_dependent());
    }

    #[test]
    fn scripts_can_reference_the_clock() {
        let source = r#"
            (define ports '((out number "at")))
            (define loaded-at $FRAME)
            (define (render inputs)
              (hash "at" (+ $FRAME $TIME $NOW)))
        "#;
        let (node, mut behavior) = setup(source);
        let mut ctx = RenderCtx::new(&node, vec![], vec![], 7, 0.5, 0.0);
        behavior.render(&mut ctx).unwrap();
        // The load-time placeholders are overwritten each render.
        assert_eq!(
            ctx.into_outputs(),
            vec![("at".to_string(), Literal::Number(7.5))]
        );
    }

    #[test]
    fn load_failure_reports_the_script_error() {
        let mut node = Node::new(1, "bad", "project.bad", 0.0, 0.0);
        let mut behavior = ScriptBehavior::new("(define broken");
        let err = behavior.setup(&mut node).unwrap_err();
        assert!(err.to_string().contains("script failed to load"));
    }

    #[test]
    fn missing_ports_is_rejected() {
        let mut node = Node::new(1, "bad", "project.bad", 0.0, 0.0);
        let mut behavior = ScriptBehavior::new("(define x 1)");
        let err = behavior.setup(&mut node).unwrap_err();
        assert_eq!(err.to_string(), ScriptError::MissingPorts.to_string());
    }

    #[test]
    fn malformed_port_entries_are_rejected() {
        let mut node = Node::new(1, "bad", "project.bad", 0.0, 0.0);
        let mut behavior = ScriptBehavior::new(r#"(define ports '((sideways number "v")))"#);
        assert!(behavior.setup(&mut node).is_err());
    }
}
