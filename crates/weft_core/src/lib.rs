pub use behavior::{Behavior, HookError, RenderCtx};
pub use context::ExpressionContext;
pub use deps::{CycleError, DependencyGraph};
pub use expr::{Evaluator, ExprError};
pub use library::{Library, NodeType, PROJECT_NAMESPACE, TypeSource};
pub use network::{Connection, Network, NetworkError, NetworkEvent, Warning};
pub use node::{Id, Node};
pub use port::{Direction, Port};
pub use script::{ScriptBehavior, ScriptError};
pub use snapshot::{Snapshot, SnapshotError};
pub use steel;
pub use value::{Color, Literal, Opaque, Point, PortType, Value};

pub mod behavior;
pub mod context;
pub mod deps;
pub mod expr;
pub mod library;
pub mod network;
pub mod node;
pub mod port;
pub mod script;
pub mod snapshot;
pub mod value;
