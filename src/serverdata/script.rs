//! Server script registry.
//!
//! Each script file, evaluated once in isolation, must define a
//! `define(script)` function that fills in `script.Name` and `script.Type`.
//! Depending on the declared type, further functions are required before the
//! script is accepted. AI scripts live in their own bucket; everything else
//! shares one namespace. Name collisions fail the load.

use crate::error::{Error, Result};
use crate::script::ScriptEngine;

#[derive(Debug, Clone)]
pub struct ServerScript {
    pub name: String,
    pub script_type: String,
    pub path: String,
    pub source: String,
}

/// Evaluate one script source and check the `define` contract plus the
/// functions its declared type requires.
pub(crate) fn parse_script(path: &str, source: &str) -> Result<ServerScript> {
    let engine = ScriptEngine::new();
    engine
        .eval(source, path)
        .map_err(|_| Error::Validation(format!("improperly formatted script: {path}")))?;

    let define = engine
        .global_function("define")
        .ok_or_else(|| Error::Validation(format!("invalid script (no define): {path}")))?;

    let table = engine
        .lua()
        .create_table()
        .map_err(|e| Error::Validation(format!("script error in {path}: {e}")))?;
    define
        .call::<()>(table.clone())
        .map_err(|e| Error::Validation(format!("script define failed in {path}: {e}")))?;

    let name: String = table.get("Name").unwrap_or_default();
    let script_type: String = table.get("Type").unwrap_or_default();

    if name.is_empty() || script_type.is_empty() {
        return Err(Error::Validation(format!(
            "script is not properly defined: {path}"
        )));
    }

    let require = |function: &str| -> Result<()> {
        if engine.global_function(function).is_none() {
            return Err(Error::Validation(format!(
                "{script_type} script '{name}' has no '{function}' function: {path}"
            )));
        }
        Ok(())
    };

    match script_type.to_lowercase().as_str() {
        "ai" => require("prepare")?,
        "eventcondition" | "eventbranchlogic" => require("check")?,
        "actiontransform" | "eventtransform" => {
            require("transform")?;
            if engine.global_function("prepare").is_some() {
                return Err(Error::Validation(format!(
                    "transform script '{name}' uses reserved function name 'prepare': {path}"
                )));
            }
        }
        "actioncustom" => require("run")?,
        "skilllogic" => require("prepare")?,
        "webapp" => require("prepare")?,
        "webgame" => require("start")?,
        other => {
            return Err(Error::Validation(format!(
                "invalid script type '{other}': {path}"
            )));
        }
    }

    Ok(ServerScript {
        name,
        script_type,
        path: path.to_string(),
        source: source.to_string(),
    })
}
