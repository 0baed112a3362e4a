//! Evaluation of expression-valued ports against the shared context.
//!
//! Expressions are Steel source text, e.g. `(* $TIME 0.5)` or
//! `(+ fader 1)` for an injected `fader` value. The context's clock and
//! injected values are registered as engine globals once per frame; the
//! result of each evaluation is coerced to the reading port's declared
//! type.

use crate::context::ExpressionContext;
use crate::value::{Color, Literal, Point, PortType};
use std::collections::HashSet;
use steel::SteelVal;
use steel::gc::Gc;
use steel::steel_vm::engine::Engine;
use thiserror::Error;

/// An expression failed to produce a value for a port.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExprError {
    /// The engine rejected or failed to run the expression.
    #[error("expression failed: {0}")]
    Eval(String),
    /// The expression ran but produced nothing.
    #[error("expression produced no value")]
    Empty,
    /// The result could not be coerced to the port's declared type.
    #[error("expected a {expected} value, found {found}")]
    Type {
        expected: PortType,
        found: &'static str,
    },
    /// Ports of this type cannot be driven by expressions.
    #[error("{0} ports cannot hold expressions")]
    Unsupported(PortType),
}

/// Evaluates port expressions in an embedded Steel engine.
pub struct Evaluator {
    engine: Engine,
    injected: HashSet<String>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            engine: Engine::new_base(),
            injected: HashSet::new(),
        }
    }

    /// Register the context's clock and injected values as engine globals.
    /// Called once per frame, before any expression evaluates. Names
    /// removed from the context since the last call go void.
    pub fn install(&mut self, ctx: &ExpressionContext) {
        let frame: isize = ctx.frame().try_into().unwrap_or(isize::MAX);
        self.engine.register_value("$FRAME", SteelVal::IntV(frame));
        self.engine.register_value("$TIME", SteelVal::NumV(ctx.time()));
        self.engine.register_value("$NOW", SteelVal::NumV(ctx.now()));
        for name in &self.injected {
            if ctx.get(name).is_none() {
                self.engine.register_value(name, SteelVal::Void);
            }
        }
        self.injected.clear();
        for (name, value) in ctx.values() {
            self.engine.register_value(name, to_steel(value));
            self.injected.insert(name.to_string());
        }
    }

    /// Evaluate `text` and coerce the result to `ty`.
    pub fn eval(&mut self, text: &str, ty: PortType) -> Result<Literal, ExprError> {
        if matches!(ty, PortType::Trigger | PortType::Object | PortType::Image) {
            return Err(ExprError::Unsupported(ty));
        }
        let values = self
            .engine
            .run(text.to_string())
            .map_err(|e| ExprError::Eval(e.to_string()))?;
        let value = values.last().ok_or(ExprError::Empty)?;
        from_steel(value, ty)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a literal into its Steel representation. Points and colors
/// become hashmaps keyed by component name; opaque handles do not cross
/// into the VM and become void.
pub(crate) fn to_steel(value: &Literal) -> SteelVal {
    match value {
        Literal::Trigger => SteelVal::Void,
        Literal::Boolean(b) => SteelVal::BoolV(*b),
        Literal::Number(n) => SteelVal::NumV(*n),
        Literal::String(s) | Literal::Choice(s) | Literal::FilePath(s) | Literal::DirPath(s) => {
            SteelVal::StringV(s.clone().into())
        }
        Literal::Point(p) => steel_map(&[("x", SteelVal::NumV(p.x)), ("y", SteelVal::NumV(p.y))]),
        Literal::Color(c) => steel_map(&[
            ("r", SteelVal::NumV(c.r)),
            ("g", SteelVal::NumV(c.g)),
            ("b", SteelVal::NumV(c.b)),
            ("a", SteelVal::NumV(c.a)),
        ]),
        Literal::Object(_) | Literal::Image(_) => SteelVal::Void,
    }
}

/// Coerce a Steel value to a literal of the declared port type.
pub(crate) fn from_steel(value: &SteelVal, ty: PortType) -> Result<Literal, ExprError> {
    let mismatch = || ExprError::Type {
        expected: ty,
        found: steel_type_name(value),
    };
    match ty {
        PortType::Number => as_f64(value).map(Literal::Number).ok_or_else(mismatch),
        PortType::Boolean => match value {
            SteelVal::BoolV(b) => Ok(Literal::Boolean(*b)),
            _ => Err(mismatch()),
        },
        // Strings accept anything with an obvious text form.
        PortType::String => match value {
            SteelVal::StringV(s) => Ok(Literal::String(s.to_string())),
            SteelVal::IntV(i) => Ok(Literal::String(i.to_string())),
            SteelVal::NumV(n) => Ok(Literal::String(n.to_string())),
            SteelVal::BoolV(b) => Ok(Literal::String(b.to_string())),
            _ => Err(mismatch()),
        },
        PortType::Choice => match value {
            SteelVal::StringV(s) => Ok(Literal::Choice(s.to_string())),
            _ => Err(mismatch()),
        },
        PortType::FilePath => match value {
            SteelVal::StringV(s) => Ok(Literal::FilePath(s.to_string())),
            _ => Err(mismatch()),
        },
        PortType::DirPath => match value {
            SteelVal::StringV(s) => Ok(Literal::DirPath(s.to_string())),
            _ => Err(mismatch()),
        },
        PortType::Point => point_from_steel(value).ok_or_else(mismatch),
        PortType::Color => color_from_steel(value).ok_or_else(mismatch),
        PortType::Trigger | PortType::Object | PortType::Image => Err(ExprError::Unsupported(ty)),
    }
}

fn as_f64(value: &SteelVal) -> Option<f64> {
    match value {
        SteelVal::NumV(n) => Some(*n),
        SteelVal::IntV(i) => Some(*i as f64),
        _ => None,
    }
}

fn point_from_steel(value: &SteelVal) -> Option<Literal> {
    match value {
        // (list x y)
        SteelVal::ListV(items) => {
            let items: Vec<_> = items.iter().collect();
            match items.as_slice() {
                [x, y] => Some(Literal::Point(Point::new(as_f64(x)?, as_f64(y)?))),
                _ => None,
            }
        }
        // (hash "x" .. "y" ..)
        SteelVal::HashMapV(map) => {
            let x = as_f64(map.get(&SteelVal::StringV("x".into()))?)?;
            let y = as_f64(map.get(&SteelVal::StringV("y".into()))?)?;
            Some(Literal::Point(Point::new(x, y)))
        }
        _ => None,
    }
}

fn color_from_steel(value: &SteelVal) -> Option<Literal> {
    match value {
        // (list r g b) or (list r g b a)
        SteelVal::ListV(items) => {
            let items: Vec<_> = items.iter().collect();
            match items.as_slice() {
                [r, g, b] => Some(Literal::Color(Color::new(
                    as_f64(r)?,
                    as_f64(g)?,
                    as_f64(b)?,
                    1.0,
                ))),
                [r, g, b, a] => Some(Literal::Color(Color::new(
                    as_f64(r)?,
                    as_f64(g)?,
                    as_f64(b)?,
                    as_f64(a)?,
                ))),
                _ => None,
            }
        }
        SteelVal::HashMapV(map) => {
            let get = |key: &str| as_f64(map.get(&SteelVal::StringV(key.into()))?);
            let a = map
                .get(&SteelVal::StringV("a".into()))
                .and_then(as_f64)
                .unwrap_or(1.0);
            Some(Literal::Color(Color::new(
                get("r")?,
                get("g")?,
                get("b")?,
                a,
            )))
        }
        _ => None,
    }
}

fn steel_map(pairs: &[(&str, SteelVal)]) -> SteelVal {
    let SteelVal::HashMapV(mut map) = SteelVal::empty_hashmap() else {
        return SteelVal::Void;
    };
    for (key, value) in pairs {
        map = Gc::new(map.update(SteelVal::StringV((*key).into()), value.clone())).into();
    }
    SteelVal::HashMapV(map)
}

fn steel_type_name(value: &SteelVal) -> &'static str {
    match value {
        SteelVal::BoolV(_) => "boolean",
        SteelVal::IntV(_) => "int",
        SteelVal::NumV(_) => "number",
        SteelVal::StringV(_) => "string",
        SteelVal::SymbolV(_) => "symbol",
        SteelVal::ListV(_) => "list",
        SteelVal::HashMapV(_) => "hashmap",
        SteelVal::Void => "void",
        _ => "value",
    }
}
