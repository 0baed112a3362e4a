//! The closed set of types a port can carry, and the values that inhabit it.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// The declared type of a port.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PortType {
    /// A momentary pulse with no payload.
    Trigger,
    Boolean,
    Number,
    String,
    /// One of a declared set of string options.
    Choice,
    Point,
    Color,
    FilePath,
    DirPath,
    /// An arbitrary runtime payload passed by handle, never persisted.
    Object,
    /// An image handle produced and consumed by node content.
    Image,
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Trigger => "trigger",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Choice => "choice",
            Self::Point => "point",
            Self::Color => "color",
            Self::FilePath => "file-path",
            Self::DirPath => "dir-path",
            Self::Object => "object",
            Self::Image => "image",
        };
        write!(f, "{s}")
    }
}

/// A 2D point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An RGBA color with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

/// A runtime-only payload passed between ports by handle.
///
/// The engine never inspects the payload. Handles compare by identity and
/// have no serialized form; snapshots simply omit them.
#[derive(Clone, Default)]
pub struct Opaque(Option<Rc<dyn Any>>);

impl Opaque {
    pub fn new<T: Any>(payload: T) -> Self {
        Self(Some(Rc::new(payload)))
    }

    /// The empty handle, used as the default for object and image ports.
    pub fn empty() -> Self {
        Self(None)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Opaque(empty)")
        } else {
            write!(f, "Opaque(handle)")
        }
    }
}

/// A concrete, typed value held by a port.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Trigger,
    Boolean(bool),
    Number(f64),
    String(String),
    Choice(String),
    Point(Point),
    Color(Color),
    FilePath(String),
    DirPath(String),
    Object(Opaque),
    Image(Opaque),
}

impl Literal {
    /// The port type this literal inhabits.
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Trigger => PortType::Trigger,
            Self::Boolean(_) => PortType::Boolean,
            Self::Number(_) => PortType::Number,
            Self::String(_) => PortType::String,
            Self::Choice(_) => PortType::Choice,
            Self::Point(_) => PortType::Point,
            Self::Color(_) => PortType::Color,
            Self::FilePath(_) => PortType::FilePath,
            Self::DirPath(_) => PortType::DirPath,
            Self::Object(_) => PortType::Object,
            Self::Image(_) => PortType::Image,
        }
    }

    /// The default value a freshly declared port of type `ty` holds.
    pub fn default_for(ty: PortType) -> Self {
        match ty {
            PortType::Trigger => Self::Trigger,
            PortType::Boolean => Self::Boolean(false),
            PortType::Number => Self::Number(0.0),
            PortType::String => Self::String(String::new()),
            PortType::Choice => Self::Choice(String::new()),
            PortType::Point => Self::Point(Point::default()),
            PortType::Color => Self::Color(Color::default()),
            PortType::FilePath => Self::FilePath(String::new()),
            PortType::DirPath => Self::DirPath(String::new()),
            PortType::Object => Self::Object(Opaque::empty()),
            PortType::Image => Self::Image(Opaque::empty()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Choice(s) | Self::FilePath(s) | Self::DirPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Point> {
        match self {
            Self::Point(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_color(&self) -> Option<Color> {
        match self {
            Self::Color(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Trigger => write!(f, "trigger"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) | Self::Choice(s) | Self::FilePath(s) | Self::DirPath(s) => {
                write!(f, "{s}")
            }
            Self::Point(p) => write!(f, "({}, {})", p.x, p.y),
            Self::Color(c) => write!(f, "({}, {}, {}, {})", c.r, c.g, c.b, c.a),
            Self::Object(_) => write!(f, "<object>"),
            Self::Image(_) => write!(f, "<image>"),
        }
    }
}

/// A port's stored content: a concrete literal or a deferred expression.
///
/// The two are mutually exclusive; setting one clears the other.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Literal(Literal),
    Expression(String),
}

impl Value {
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(v) => Some(v),
            Self::Expression(_) => None,
        }
    }

    pub fn as_expression(&self) -> Option<&str> {
        match self {
            Self::Expression(text) => Some(text),
            Self::Literal(_) => None,
        }
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }
}

impl From<Literal> for Value {
    fn from(v: Literal) -> Self {
        Self::Literal(v)
    }
}
