//! The standard catalog of built-in node behaviors for weft.

pub use basic::{Button, Number};
pub use clock::Clock;
pub use log::Log;
pub use logic::Switch;
pub use math::{Add, Multiply, Negate};
pub use strings::Concat;

pub mod basic;
pub mod clock;
pub mod log;
pub mod logic;
pub mod math;
pub mod strings;

use weft_core::Library;

/// The full built-in catalog.
pub fn library() -> Library {
    let mut lib = Library::new();
    lib.register("core.button", "Button", "Fires a trigger pulse.", Button::default);
    lib.register("core.number", "Number", "Holds a number.", Number::default);
    lib.register("logic.switch", "Switch", "Selects one of two numbers.", Switch::default);
    lib.register("math.add", "Add", "Sum of two numbers.", Add::default);
    lib.register("math.multiply", "Multiply", "Product of two numbers.", Multiply::default);
    lib.register("math.negate", "Negate", "Negates a number.", Negate::default);
    lib.register("string.concat", "Concat", "Joins two strings.", Concat::default);
    lib.register("time.clock", "Clock", "Seconds and frames since start.", Clock::default);
    lib.register("util.log", "Log", "Logs its input.", Log::default);
    lib
}
