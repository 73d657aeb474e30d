//! Default names for robots, connections and devices created without one.
//!
//! Names have the form `Kind-XXXX` where `XXXX` is an upper-case hexadecimal
//! counter. The counter is monotone within a process, so the sequence of
//! generated names is reproducible for a given sequence of calls.

use std::sync::atomic::{AtomicU64, Ordering};

static GLOBAL: NameGenerator = NameGenerator::new();

/// Monotone `Kind-XXXX` name source.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counter: AtomicU64,
}

impl NameGenerator {
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next name for `kind`.
    pub fn next(&self, kind: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{kind}-{n:04X}")
    }
}

/// Next name from the process-wide generator.
pub fn default_name(kind: &str) -> String {
    GLOBAL.next(kind)
}
