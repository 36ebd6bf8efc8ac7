//! Wire-encoded record streams.
//!
//! Streams are opened in `init` and released in `close`, so one component
//! can take part in several runs. A malformed ASCII line only loses that
//! line; any binary format error or IO error takes the stream out of the
//! run.

use crate::codec::{CodecError, WireFormat};
use crate::config::{EndpointConfig, EndpointKind};
use crate::data::Record;
use crate::pipeline::{Component, ComponentError, ComponentResult, Input, Output, ReadOutcome};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

type BoxedReader = Box<dyn BufRead + Send>;

/// `StdinLock` is not `Send`, so the reader buffers the shared handle.
fn stdin_reader() -> BoxedReader {
    Box::new(BufReader::new(std::io::stdin()))
}
type BoxedWriter = Box<dyn Write + Send>;

enum Source {
    Stdin,
    File(PathBuf),
    /// Handed over on the first `init`; later runs see an exhausted stream.
    Reader(Option<BoxedReader>),
}

/// Reads records from a byte stream
pub struct StreamInput {
    name: String,
    format: WireFormat,
    source: Source,
    reader: Option<BoxedReader>,
}

impl StreamInput {
    pub fn stdin(format: WireFormat) -> Self {
        Self {
            name: format!("stdin ({})", format),
            format,
            source: Source::Stdin,
            reader: None,
        }
    }

    pub fn file(path: impl Into<PathBuf>, format: WireFormat) -> Self {
        let path = path.into();
        Self {
            name: format!("{} ({})", path.display(), format),
            format,
            source: Source::File(path),
            reader: None,
        }
    }

    pub fn from_reader(
        name: impl Into<String>,
        reader: impl BufRead + Send + 'static,
        format: WireFormat,
    ) -> Self {
        Self {
            name: name.into(),
            format,
            source: Source::Reader(Some(Box::new(reader))),
            reader: None,
        }
    }

    pub fn from_endpoint(endpoint: &EndpointConfig) -> Self {
        match (&endpoint.kind, &endpoint.path) {
            (EndpointKind::File, Some(path)) => Self::file(path, endpoint.format),
            _ => Self::stdin(endpoint.format),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }
}

impl Component for StreamInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self) -> ComponentResult<()> {
        if let Source::File(path) = &self.source {
            if path.as_os_str().is_empty() {
                return Err(ComponentError::permanent("empty input path"));
            }
        }
        Ok(())
    }

    fn init(&mut self) -> ComponentResult<()> {
        self.reader = match &mut self.source {
            Source::Stdin => Some(stdin_reader()),
            Source::File(path) => {
                let file = File::open(&*path).map_err(|e| {
                    ComponentError::permanent(format!("cannot open {}: {}", path.display(), e))
                })?;
                Some(Box::new(BufReader::new(file)))
            }
            Source::Reader(reader) => reader.take(),
        };
        Ok(())
    }

    fn close(&mut self) -> ComponentResult<()> {
        self.reader = None;
        Ok(())
    }
}

impl Input for StreamInput {
    fn can_read_data(&mut self) -> bool {
        self.reader.is_some()
    }

    fn read_data(&mut self) -> ComponentResult<ReadOutcome> {
        let format = self.format;
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ReadOutcome::EndOfInput);
        };

        match format.read_record(reader) {
            Ok(Some(record)) => Ok(ReadOutcome::Record(record)),
            Ok(None) => {
                self.reader = None;
                Ok(ReadOutcome::EndOfInput)
            }
            Err(e) if e.is_recoverable(format) => Err(ComponentError::temporary(e.to_string())),
            Err(e) => {
                self.reader = None;
                Err(ComponentError::permanent(e.to_string()))
            }
        }
    }
}

enum Sink {
    Stdout,
    File { path: PathBuf, append: bool },
    Writer(Option<BoxedWriter>),
}

/// Writes records to a byte stream
pub struct StreamOutput {
    name: String,
    format: WireFormat,
    sink: Sink,
    writer: Option<BoxedWriter>,
    /// Flush after every record (stdout)
    flush_each: bool,
}

impl StreamOutput {
    pub fn stdout(format: WireFormat) -> Self {
        Self {
            name: format!("stdout ({})", format),
            format,
            sink: Sink::Stdout,
            writer: None,
            flush_each: true,
        }
    }

    pub fn file(path: impl Into<PathBuf>, format: WireFormat, append: bool) -> Self {
        let path = path.into();
        Self {
            name: format!("{} ({})", path.display(), format),
            format,
            sink: Sink::File { path, append },
            writer: None,
            flush_each: false,
        }
    }

    pub fn from_writer(
        name: impl Into<String>,
        writer: impl Write + Send + 'static,
        format: WireFormat,
    ) -> Self {
        Self {
            name: name.into(),
            format,
            sink: Sink::Writer(Some(Box::new(writer))),
            writer: None,
            flush_each: true,
        }
    }

    pub fn from_endpoint(endpoint: &EndpointConfig) -> Self {
        match (&endpoint.kind, &endpoint.path) {
            (EndpointKind::File, Some(path)) => {
                Self::file(path, endpoint.format, endpoint.append)
            }
            _ => Self::stdout(endpoint.format),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    fn flush(&mut self) -> ComponentResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .map_err(|e| ComponentError::permanent(format!("flush failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Component for StreamOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> ComponentResult<()> {
        let writer: Option<BoxedWriter> = match &mut self.sink {
            Sink::Stdout => Some(Box::new(std::io::stdout())),
            Sink::File { path, append } => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .append(*append)
                    .truncate(!*append)
                    .open(&*path)
                    .map_err(|e| {
                        ComponentError::permanent(format!("cannot open {}: {}", path.display(), e))
                    })?;
                // later runs must not wipe what earlier runs wrote
                *append = true;
                Some(Box::new(BufWriter::new(file)))
            }
            Sink::Writer(writer) => writer.take(),
        };
        if writer.is_some() {
            self.writer = writer;
        }
        if self.writer.is_none() {
            return Err(ComponentError::permanent("output stream already released"));
        }
        Ok(())
    }

    fn close(&mut self) -> ComponentResult<()> {
        let result = self.flush();
        if !matches!(self.sink, Sink::Writer(_)) {
            self.writer = None;
        }
        result
    }
}

impl Output for StreamOutput {
    fn write(&mut self, record: &Record) -> ComponentResult<bool> {
        let format = self.format;
        let Some(writer) = self.writer.as_mut() else {
            return Err(ComponentError::permanent("output stream is not open"));
        };

        match format.write_record(record, writer) {
            Ok(()) => {}
            Err(CodecError::Io(e)) => return Err(ComponentError::permanent(e.to_string())),
            // this record has no encoding in the format; the stream is intact
            Err(e) => return Err(ComponentError::temporary(e.to_string())),
        }
        if self.flush_each {
            self.flush()?;
        }
        Ok(true)
    }
}
