//! Embedded scripting engine.
//!
//! A thin wrapper over a Lua VM. Engines are cheap to create and are treated
//! as per-thread resources: the VM is not reentrant across threads, so each
//! consumer (migration run, script validation pass, worker) owns its own.

use mlua::{Function, Lua};

use crate::error::{Error, Result};

pub struct ScriptEngine {
    lua: Lua,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self { lua: Lua::new() }
    }

    /// Evaluate a chunk of script source. `name` shows up in script
    /// tracebacks.
    pub fn eval(&self, source: &str, name: &str) -> Result<()> {
        self.lua
            .load(source)
            .set_name(name)
            .exec()
            .map_err(|e| Error::Schema(format!("script error in {name}: {e}")))
    }

    /// Fetch a global function if the evaluated source defined one.
    pub fn global_function(&self, name: &str) -> Option<Function> {
        self.lua.globals().get::<Function>(name).ok()
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_and_call() {
        let engine = ScriptEngine::new();
        engine
            .eval("function double(x) return x * 2 end", "test.lua")
            .unwrap();

        let double = engine.global_function("double").unwrap();
        let result: i64 = double.call(21).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn test_missing_function_is_none() {
        let engine = ScriptEngine::new();
        engine.eval("x = 1", "test.lua").unwrap();
        assert!(engine.global_function("nope").is_none());
    }

    #[test]
    fn test_syntax_error_reported() {
        let engine = ScriptEngine::new();
        let err = engine.eval("function broken(", "bad.lua").unwrap_err();
        assert!(format!("{err}").contains("bad.lua"));
    }
}
