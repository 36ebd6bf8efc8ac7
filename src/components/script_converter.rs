//! Converter backed by a pair of Rhai scripts.
//!
//! `handles` is evaluated for every record offered to the converter and
//! must yield a bool; `convert` returns the replacement records (see
//! [`crate::scripting`]). Both are compiled in `configure`, so a script
//! with a syntax error keeps the converter out of every run.

use crate::config::ScriptConverterConfig;
use crate::data::Record;
use crate::pipeline::{Component, ComponentError, ComponentResult, Converter};
use crate::scripting::{CompiledScript, ScriptEngine};

pub struct ScriptConverter {
    name: String,
    handles_source: String,
    convert_source: String,
    engine: ScriptEngine,
    compiled: Option<(CompiledScript, CompiledScript)>,
}

impl ScriptConverter {
    pub fn new(
        name: impl Into<String>,
        handles: impl Into<String>,
        convert: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            handles_source: handles.into(),
            convert_source: convert.into(),
            engine: ScriptEngine::new(),
            compiled: None,
        }
    }

    pub fn from_config(config: &ScriptConverterConfig) -> Self {
        Self::new(&config.name, &config.handles, &config.convert)
    }

    /// One of the [`builtins`](crate::scripting::builtins)
    pub fn builtin((name, handles, convert): (&str, &str, &str)) -> Self {
        Self::new(name, handles, convert)
    }

    pub fn handles_source(&self) -> &str {
        &self.handles_source
    }

    pub fn convert_source(&self) -> &str {
        &self.convert_source
    }
}

impl Component for ScriptConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self) -> ComponentResult<()> {
        self.compiled = None;
        let handles = self
            .engine
            .compile(&format!("{}.handles", self.name), &self.handles_source)
            .map_err(|e| ComponentError::permanent(e.to_string()))?;
        let convert = self
            .engine
            .compile(&format!("{}.convert", self.name), &self.convert_source)
            .map_err(|e| ComponentError::permanent(e.to_string()))?;
        self.compiled = Some((handles, convert));
        Ok(())
    }
}

impl Converter for ScriptConverter {
    fn can_handle(&self, record: &Record) -> bool {
        let Some((handles, _)) = &self.compiled else {
            return false;
        };
        match self.engine.eval_handles(handles, record) {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::debug!(
                    converter = %self.name,
                    record = %record.summary(),
                    "handles failed: {}",
                    e
                );
                false
            }
        }
    }

    fn convert(&mut self, record: &Record) -> ComponentResult<Vec<Record>> {
        let Some((_, convert)) = &self.compiled else {
            return Err(ComponentError::permanent("converter is not configured"));
        };
        self.engine
            .eval_convert(convert, record)
            .map_err(|e| ComponentError::temporary(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;
    use crate::scripting::builtins;

    fn rec(values: Vec<Value>) -> Record {
        Record::new(values).unwrap()
    }

    #[test]
    fn test_split_builtin() {
        let mut converter = ScriptConverter::builtin(builtins::SPLIT_FIELDS);
        converter.configure().unwrap();

        let record = rec(vec![Value::Int64(1), Value::NullTerm("a".into())]);
        assert!(converter.can_handle(&record));
        assert!(!converter.can_handle(&rec(vec![Value::Int64(1)])));
        assert_eq!(converter.convert(&record).unwrap().len(), 2);
    }

    #[test]
    fn test_promote_errors_builtin() {
        let mut converter = ScriptConverter::builtin(builtins::PROMOTE_ERRORS);
        converter.configure().unwrap();

        let record = rec(vec![Value::NullTerm("disk ERROR".into())]);
        assert!(converter.can_handle(&record));
        let out = converter.convert(&record).unwrap();
        assert_eq!(out[0].priority(), 50);
        // the promoted record is not claimed again
        assert!(!converter.can_handle(&out[0]));
    }

    #[test]
    fn test_delay_builtin() {
        let mut converter = ScriptConverter::builtin(builtins::DELAY_ONE_SECOND);
        converter.configure().unwrap();
        let out = converter.convert(&rec(vec![Value::Int64(1)])).unwrap();
        assert_eq!(out[0].time_ms(), Some(1000));
        assert!(!converter.can_handle(&out[0]));
    }

    #[test]
    fn test_compile_error_fails_configure() {
        let mut converter = ScriptConverter::new("bad", "true", "[1, ");
        let err = converter.configure().unwrap_err();
        assert!(err.is_permanent());
        assert!(err.message().contains("bad.convert"));
        assert!(!converter.can_handle(&Record::empty()));
    }

    #[test]
    fn test_runtime_error_is_temporary() {
        let mut converter = ScriptConverter::new("oops", "true", "fields[5] + 1");
        converter.configure().unwrap();
        let err = converter.convert(&rec(vec![Value::Int64(1)])).unwrap_err();
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_failing_handles_declines() {
        let mut converter = ScriptConverter::new("h", "fields[3] > 0", "[]");
        converter.configure().unwrap();
        assert!(!converter.can_handle(&rec(vec![Value::Int64(1)])));
    }
}
