//! Rhai Scripting Engine for Record Converters
//!
//! A script converter is defined by two Rhai snippets: `handles`, which
//! decides whether the converter claims a record, and `convert`, which
//! returns the replacement records.
//!
//! ## Scope Variables
//!
//! Both snippets see the incoming record as:
//!
//! - `fields` - Array of field values (`INT`, `FLOAT`, string or blob)
//! - `field_types` - Array of wire type names (`"int8"`, `"float32"`, ...)
//! - `priority` - Record priority as an integer
//! - `time` - Scheduled time in milliseconds, or `()` when unscheduled
//!
//! ## Return Values of `convert`
//!
//! - `()` or `[]` - No records (the input record is swallowed)
//! - An array of scalars - One record with those fields
//! - A map `#{ fields: [...], priority: 5, time: 1000 }` - One record; missing
//!   keys inherit from the input record
//! - An array of arrays and/or maps - One record per element
//!
//! Plain integers become `int64` fields, floats `float64`, strings
//! null-terminated strings and blobs binary fields. `typed(value, "int8")`
//! pins a narrower wire type.
//!
//! ## Example Scripts
//!
//! Splitting a record into one record per field:
//! ```rhai
//! // handles
//! fields.len() > 1
//! // convert
//! fields.map(|f| [f])
//! ```
//!
//! Promoting error lines so they preempt routine traffic:
//! ```rhai
//! // handles
//! priority < 50 && fields.some(|f| type_of(f) == "string" && f.contains("ERROR"))
//! // convert
//! #{ fields: fields, priority: 50 }
//! ```

mod engine;

pub use engine::{dynamic_to_records, dynamic_to_value, value_to_dynamic, ScriptEngine};

use crate::error::{PipeError, Result};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A compiled script that can be evaluated repeatedly
#[derive(Clone)]
pub struct CompiledScript {
    ast: AST,
    source: String,
    name: String,
}

impl CompiledScript {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled scripts to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from script source to compiled script
    cache: HashMap<String, CompiledScript>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached script or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledScript> {
        if let Some(script) = self.cache.get(source) {
            return Ok(script.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| PipeError::Script(format!("Compilation error in '{}': {}", name, e)))?;

        let script = CompiledScript {
            ast,
            source: source.to_string(),
            name: name.to_string(),
        };

        self.cache.insert(source.to_string(), script.clone());
        Ok(script)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe script cache wrapper
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;

pub fn create_shared_cache() -> SharedScriptCache {
    Arc::new(RwLock::new(ScriptCache::new()))
}

/// Ready-made `(name, handles, convert)` converter scripts
pub mod builtins {
    /// One record per field
    pub const SPLIT_FIELDS: (&str, &str, &str) = (
        "split-fields",
        "fields.len() > 1",
        "fields.map(|f| [f])",
    );

    /// Swallow records without fields
    pub const DROP_EMPTY: (&str, &str, &str) = ("drop-empty", "fields.len() == 0", "[]");

    /// Raise records mentioning ERROR to priority 50
    pub const PROMOTE_ERRORS: (&str, &str, &str) = (
        "promote-errors",
        r#"priority < 50 && fields.some(|f| type_of(f) == "string" && f.contains("ERROR"))"#,
        "#{ fields: fields, priority: 50 }",
    );

    /// Schedule unscheduled records one second after start
    pub const DELAY_ONE_SECOND: (&str, &str, &str) = (
        "delay-1s",
        "type_of(time) == \"()\"",
        "#{ fields: fields, time: 1000 }",
    );

    pub fn all() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![SPLIT_FIELDS, DROP_EMPTY, PROMOTE_ERRORS, DELAY_ONE_SECOND]
    }
}
