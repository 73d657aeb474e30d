//! [`Commander`] – a string-keyed table of dynamically invocable operations.
//!
//! Every command takes a JSON object of named arguments and returns a JSON
//! value. The HTTP layer dispatches exclusively through this table.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use robokit_types::{BotError, Params};
use serde_json::Value;
use tracing::debug;

/// A registered command.
pub type CommandFn = Arc<dyn Fn(Params) -> Result<Value, BotError> + Send + Sync>;

#[derive(Default)]
pub struct Commander {
    commands: RwLock<BTreeMap<String, CommandFn>>,
}

impl Commander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` under `name`.
    ///
    /// A second registration under the same name replaces the first.
    pub fn add_command<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Params) -> Result<Value, BotError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.commands.write().insert(name.clone(), Arc::new(f)).is_some() {
            debug!(command = %name, "command replaced");
        }
    }

    pub fn command(&self, name: &str) -> Option<CommandFn> {
        self.commands.read().get(name).cloned()
    }

    /// Snapshot of the table keyed by name.
    pub fn commands(&self) -> BTreeMap<String, CommandFn> {
        self.commands.read().clone()
    }

    /// Command names in sorted order.
    pub fn command_names(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Look `name` up and run it with `params`.
    ///
    /// The table lock is released before the command runs.
    pub fn execute(&self, name: &str, params: Params) -> Result<Value, BotError> {
        let f = self
            .command(name)
            .ok_or_else(|| BotError::UnknownCommand(name.to_string()))?;
        f(params)
    }
}

impl std::fmt::Debug for Commander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commander")
            .field("commands", &self.command_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn execute_passes_arguments_through() {
        let commander = Commander::new();
        commander.add_command("echo", |p| Ok(Value::Object(p)));

        let out = commander.execute("echo", params(json!({"x": 1})));
        assert_eq!(out, Ok(json!({"x": 1})));
    }

    #[test]
    fn last_registration_wins() {
        let commander = Commander::new();
        commander.add_command("speed", |_| Ok(json!(1)));
        commander.add_command("speed", |_| Ok(json!(2)));

        assert_eq!(commander.command_names(), ["speed"]);
        assert_eq!(commander.execute("speed", Params::new()), Ok(json!(2)));
    }

    #[test]
    fn unknown_command_is_reported() {
        let commander = Commander::new();
        assert_eq!(
            commander.execute("missing", Params::new()),
            Err(BotError::UnknownCommand("missing".into()))
        );
        assert!(commander.command("missing").is_none());
    }

    #[test]
    fn names_are_arbitrary_utf8_and_sorted() {
        let commander = Commander::new();
        commander.add_command("zeta", |_| Ok(Value::Null));
        commander.add_command("ángulo", |_| Ok(Value::Null));
        commander.add_command("alpha beta", |_| Ok(Value::Null));

        assert_eq!(commander.command_names(), ["alpha beta", "zeta", "ángulo"]);
        assert_eq!(commander.commands().len(), 3);
    }

    #[test]
    fn command_errors_propagate() {
        let commander = Commander::new();
        commander.add_command("fail", |_| Err(BotError::hardware("led", "pin busy")));

        let err = commander.execute("fail", Params::new());
        assert_eq!(err, Err(BotError::hardware("led", "pin busy")));
    }

    #[test]
    fn command_may_reenter_the_table() {
        let commander = Arc::new(Commander::new());
        let inner = Arc::clone(&commander);
        commander.add_command("outer", move |_| inner.execute("inner", Params::new()));
        commander.add_command("inner", |_| Ok(json!("done")));

        assert_eq!(commander.execute("outer", Params::new()), Ok(json!("done")));
    }
}
