//! The environment expression-valued ports are evaluated against.

use crate::value::Literal;
use std::collections::BTreeMap;

/// A flat name/value environment plus the frame clock.
///
/// The network rewrites the clock once per frame, synchronously before the
/// topological walk, so every expression evaluated within one pass sees the
/// same `$FRAME`/`$TIME`/`$NOW`. Additional values (sensor readings, OSC
/// faders) are injected by the embedding application and addressed by name.
#[derive(Clone, Debug)]
pub struct ExpressionContext {
    frame: u64,
    time: f64,
    now: f64,
    values: BTreeMap<String, Literal>,
}

impl ExpressionContext {
    pub fn new() -> Self {
        Self {
            frame: 1,
            time: 0.0,
            now: 0.0,
            values: BTreeMap::new(),
        }
    }

    /// The 1-based frame counter, incremented once per completed pass.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Seconds since the network started.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Wall-clock seconds since the Unix epoch.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub(crate) fn set_clock(&mut self, frame: u64, time: f64, now: f64) {
        self.frame = frame;
        self.time = time;
        self.now = now;
    }

    pub(crate) fn advance_frame(&mut self) {
        self.frame += 1;
    }

    /// Inject a value under `name`. Names should be valid Steel identifiers
    /// so expressions can reference them directly.
    pub fn insert(&mut self, name: impl Into<String>, value: Literal) {
        self.values.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Literal> {
        self.values.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Literal> {
        self.values.get(name)
    }

    /// The injected values in name order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Literal)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for ExpressionContext {
    fn default() -> Self {
        Self::new()
    }
}
