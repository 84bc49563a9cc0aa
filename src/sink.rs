//! Output sinks for emitted rows.
//!
//! Sinks are called synchronously from event handling, so a slow sink
//! delays every subsequent event.

use crate::core::Row;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Receives every row emitted by an aggregation session.
pub trait RowSink {
    fn write_row(&mut self, row: &Row) -> io::Result<()>;

    /// Flush and release any held resources. Called once at session stop.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// On-disk output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "jsonl" | "json-lines" => Some(OutputFormat::Jsonl),
            _ => None,
        }
    }
}

/// Comma-separated rows, preceded by one header line.
///
/// Values are written with two decimals.
pub struct CsvSink<W: Write> {
    writer: W,
    wrote_header: bool,
}

impl CsvSink<BufWriter<File>> {
    /// Create (or truncate) the output file.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            wrote_header: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for CsvSink<W> {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        if !self.wrote_header {
            writeln!(self.writer, "{}", row.channels().join(","))?;
            self.wrote_header = true;
        }

        writeln!(self.writer, "{}", format_values(row))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Comma-separated values with two decimals.
fn format_values(row: &Row) -> String {
    row.values()
        .iter()
        .map(|v| format!("{v:.2}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Console echo of every row: its index, the channel header and the values.
pub struct EchoSink<W: Write> {
    writer: W,
}

impl EchoSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> EchoSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for EchoSink<W> {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        writeln!(self.writer, "{}", row.seq)?;
        writeln!(self.writer, "{}", row.channels().join(","))?;
        writeln!(self.writer, "{}", format_values(row))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Hands every row to two sinks, `primary` first.
pub struct TeeSink<A, B> {
    primary: A,
    secondary: B,
}

impl<A: RowSink, B: RowSink> TeeSink<A, B> {
    pub fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }

    pub fn into_parts(self) -> (A, B) {
        (self.primary, self.secondary)
    }
}

impl<A: RowSink, B: RowSink> RowSink for TeeSink<A, B> {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        let primary = self.primary.write_row(row);
        let secondary = self.secondary.write_row(row);
        primary.and(secondary)
    }

    /// Both sinks are finished even if the first fails.
    fn finish(&mut self) -> io::Result<()> {
        let primary = self.primary.finish();
        let secondary = self.secondary.finish();
        primary.and(secondary)
    }
}

/// One JSON object per row: `{"seq":..,"timestamp":..,"channels":{..}}`.
pub struct JsonlSink<W: Write> {
    writer: W,
}

impl JsonlSink<BufWriter<File>> {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RowSink for JsonlSink<W> {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Keeps every row in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<Row>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowSink for MemorySink {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        self.rows.push(row.clone());
        Ok(())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Adapts a closure into a sink.
pub struct CallbackSink<F>(pub F);

impl<F> RowSink for CallbackSink<F>
where
    F: FnMut(&Row) -> io::Result<()>,
{
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        (self.0)(row)
    }
}

/// File sink for the chosen format.
pub fn file_sink(format: OutputFormat, path: &Path) -> io::Result<Box<dyn RowSink>> {
    let sink: Box<dyn RowSink> = match format {
        OutputFormat::Csv => Box::new(CsvSink::create(path)?),
        OutputFormat::Jsonl => Box::new(JsonlSink::create(path)?),
    };
    Ok(sink)
}

impl<S: RowSink + ?Sized> RowSink for Box<S> {
    fn write_row(&mut self, row: &Row) -> io::Result<()> {
        (**self).write_row(row)
    }

    fn finish(&mut self) -> io::Result<()> {
        (**self).finish()
    }
}
