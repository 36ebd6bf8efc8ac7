//! Rhai Script Engine Implementation
//!
//! Wraps a sandboxed [`rhai::Engine`] and converts between records and
//! script values. See the [module docs](super) for the script contract.

use crate::data::{Record, Value, ValueType, MAX_FIELDS};
use crate::error::{PipeError, Result};
use crate::scripting::{create_shared_cache, CompiledScript, SharedScriptCache};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};

/// Sandboxed engine evaluating converter scripts against records
pub struct ScriptEngine {
    engine: Engine,
    cache: SharedScriptCache,
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine {
    /// Create a new script engine with its own cache
    pub fn new() -> Self {
        Self::with_cache(create_shared_cache())
    }

    /// Create a new script engine with a shared cache
    pub fn with_cache(cache: SharedScriptCache) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine, cache }
    }

    /// Configure the Rhai engine with record helpers and safety limits
    fn configure_engine(engine: &mut Engine) {
        // Set safety limits
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(1 << 20);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);

        // Typed fields keep their wire type through a script
        engine.register_type_with_name::<Value>("Field");
        engine.register_fn("to_string", |v: &mut Value| v.to_string());
        engine.register_fn("field_type", |v: &mut Value| v.value_type().to_string());
        engine.register_fn(
            "typed",
            |value: Dynamic, type_name: &str| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
                let value_type = parse_type_name(type_name)
                    .ok_or_else(|| format!("unknown field type '{}'", type_name))?;
                let value = dynamic_to_value(value).map_err(|e| e.to_string())?;
                let typed = Value::coerce(value_type, &value).map_err(|e| e.to_string())?;
                Ok(Dynamic::from(typed))
            },
        );
        engine.register_fn("untyped", |v: &mut Value| value_to_dynamic(v));

        // Record builders
        engine.register_fn("record", |fields: Array| -> Map {
            let mut map = Map::new();
            map.insert("fields".into(), Dynamic::from_array(fields));
            map
        });
        engine.register_fn("record", |fields: Array, priority: i64| -> Map {
            let mut map = Map::new();
            map.insert("fields".into(), Dynamic::from_array(fields));
            map.insert("priority".into(), Dynamic::from(priority));
            map
        });

        // ===== Mathematical Functions =====

        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("sqrt", |x: f64| x.sqrt());
        engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
        engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
        engine.register_fn("clamp", |x: i64, min: i64, max: i64| x.clamp(min, max));
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));
        engine.register_fn("lerp", |a: f64, b: f64, t: f64| a + (b - a) * t);
        engine.register_fn(
            "map_range",
            |x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64| {
                (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
            },
        );

        // Bit manipulation
        engine.register_fn("bit_and", |a: i64, b: i64| a & b);
        engine.register_fn("bit_or", |a: i64, b: i64| a | b);
        engine.register_fn("bit_xor", |a: i64, b: i64| a ^ b);

        // Type conversions
        engine.register_fn("to_int", |x: f64| x as i64);
        engine.register_fn("to_float", |x: i64| x as f64);
    }

    /// Compile a script and cache it
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledScript> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| PipeError::Script(format!("Failed to acquire cache lock: {}", e)))?;

        cache.get_or_compile(&self.engine, name, source)
    }

    /// Check that a script compiles without caching it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| PipeError::Script(format!("Compilation error: {}", e)))
    }

    fn eval(&self, script: &CompiledScript, record: &Record) -> Result<Dynamic> {
        let mut scope = record_scope(record);
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, script.ast())
            .map_err(|e| {
                PipeError::from_rhai_error(e).with_context(format!("script '{}'", script.name()))
            })
    }

    /// Evaluate a `handles` script. It must produce a boolean.
    pub fn eval_handles(&self, script: &CompiledScript, record: &Record) -> Result<bool> {
        let result = self.eval(script, record)?;
        result.as_bool().map_err(|actual| {
            PipeError::Script(format!(
                "script '{}' returned {} instead of bool",
                script.name(),
                actual
            ))
        })
    }

    /// Evaluate a `convert` script into the replacement records.
    pub fn eval_convert(&self, script: &CompiledScript, record: &Record) -> Result<Vec<Record>> {
        let result = self.eval(script, record)?;
        dynamic_to_records(result, record)
            .map_err(|e| e.with_context(format!("script '{}'", script.name())))
    }
}

fn parse_type_name(name: &str) -> Option<ValueType> {
    ValueType::ALL
        .into_iter()
        .find(|t| t.to_string().eq_ignore_ascii_case(name))
}

/// Scope exposing `record` to a script
fn record_scope(record: &Record) -> Scope<'static> {
    let fields: Array = record.values().iter().map(value_to_dynamic).collect();
    let types: Array = record
        .values()
        .iter()
        .map(|v| Dynamic::from(v.value_type().to_string()))
        .collect();

    let mut scope = Scope::new();
    scope.push("fields", fields);
    scope.push("field_types", types);
    scope.push("priority", record.priority() as i64);
    match record.time_ms() {
        Some(ms) => scope.push("time", ms as i64),
        None => scope.push("time", ()),
    };
    scope
}

/// Native script value for a field
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Int8(v) => Dynamic::from(*v as i64),
        Value::Int32(v) => Dynamic::from(*v as i64),
        Value::Int64(v) => Dynamic::from(*v),
        Value::Float32(v) => Dynamic::from(*v as f64),
        Value::Float64(v) => Dynamic::from(*v),
        Value::Utf(s) | Value::NullTerm(s) => Dynamic::from(s.clone()),
        Value::Binary(b) => Dynamic::from_blob(b.clone()),
    }
}

/// Field for a script value
pub fn dynamic_to_value(value: Dynamic) -> Result<Value> {
    let type_name = value.type_name();
    if value.is::<Value>() {
        return Ok(value.cast::<Value>());
    }
    if let Ok(v) = value.as_int() {
        return Ok(Value::Int64(v));
    }
    if let Ok(v) = value.as_float() {
        return Ok(Value::Float64(v));
    }
    if let Ok(v) = value.as_bool() {
        return Ok(Value::Int8(v as i8));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::NullTerm(c.to_string()));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(Value::NullTerm)
            .map_err(|e| PipeError::Script(e.to_string()));
    }
    if value.is_blob() {
        return value
            .into_blob()
            .map(Value::Binary)
            .map_err(|e| PipeError::Script(e.to_string()));
    }
    Err(PipeError::Script(format!(
        "cannot use {} as a record field",
        type_name
    )))
}

fn is_record_like(value: &Dynamic) -> bool {
    value.is_array() || value.is_map()
}

/// Records for the result of a `convert` script; see the module docs for
/// the accepted shapes. `source` supplies the default priority and time.
pub fn dynamic_to_records(result: Dynamic, source: &Record) -> Result<Vec<Record>> {
    if result.is_unit() {
        return Ok(Vec::new());
    }
    if result.is_map() {
        return Ok(vec![dynamic_to_record(result, source)?]);
    }
    if !result.is_array() {
        return Err(PipeError::Script(format!(
            "convert returned {}, expected an array or map",
            result.type_name()
        )));
    }

    let items = result
        .into_array()
        .map_err(|e| PipeError::Script(e.to_string()))?;
    if items.iter().all(is_record_like) {
        items
            .into_iter()
            .map(|item| dynamic_to_record(item, source))
            .collect()
    } else {
        Ok(vec![fields_to_record(items, source)?])
    }
}

fn dynamic_to_record(item: Dynamic, source: &Record) -> Result<Record> {
    if item.is_array() {
        let fields = item
            .into_array()
            .map_err(|e| PipeError::Script(e.to_string()))?;
        return fields_to_record(fields, source);
    }

    let map = item
        .try_cast::<Map>()
        .ok_or_else(|| PipeError::Script("record must be an array or map".to_string()))?;

    let fields = match map.get("fields") {
        Some(f) => f
            .clone()
            .into_array()
            .map_err(|actual| {
                PipeError::Script(format!("'fields' is {}, expected array", actual))
            })?,
        None => Array::new(),
    };
    let mut record = fields_to_record(fields, source)?;

    if let Some(p) = map.get("priority") {
        let priority = p
            .as_int()
            .map_err(|actual| {
                PipeError::Script(format!("'priority' is {}, expected int", actual))
            })?;
        let priority = i32::try_from(priority)
            .map_err(|_| PipeError::Script(format!("priority {} out of range", priority)))?;
        record = record.with_priority(priority)?;
    }
    if let Some(t) = map.get("time") {
        record = if t.is_unit() {
            record.without_time()
        } else {
            let ms = t
                .as_int()
                .map_err(|actual| {
                    PipeError::Script(format!("'time' is {}, expected int", actual))
                })?;
            let ms = u32::try_from(ms)
                .map_err(|_| PipeError::Script(format!("time {} out of range", ms)))?;
            record.with_time(ms)
        };
    }
    Ok(record)
}

fn fields_to_record(fields: Array, source: &Record) -> Result<Record> {
    if fields.len() > MAX_FIELDS {
        return Err(PipeError::Script(format!(
            "record has {} fields, at most {} allowed",
            fields.len(),
            MAX_FIELDS
        )));
    }
    let values = fields
        .into_iter()
        .map(dynamic_to_value)
        .collect::<Result<Vec<_>>>()?;
    let mut record = Record::new(values)?.with_priority(source.priority() as i32)?;
    if let Some(ms) = source.time_ms() {
        record = record.with_time(ms);
    }
    Ok(record)
}
