use std::io::{self, Stdout, Write};

use crate::types::FlowPrediction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `Prediction for flow N in FILE: LABEL`
    #[default]
    Text,
    /// One JSON object per flow.
    Jsonl,
}

/// Destination for per-flow results.
pub trait PredictionSink {
    fn publish(&mut self, prediction: &FlowPrediction) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct WriterSink<W: Write> {
    writer: W,
    format: OutputFormat,
}

impl WriterSink<Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> PredictionSink for WriterSink<W> {
    fn publish(&mut self, p: &FlowPrediction) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(
                self.writer,
                "Prediction for flow {} in {}: {}",
                p.row + 1,
                p.file,
                p.label
            ),
            OutputFormat::Jsonl => {
                serde_json::to_writer(&mut self.writer, p)?;
                self.writer.write_all(b"\n")
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Keeps everything in memory; used when embedding the pipeline.
impl PredictionSink for Vec<FlowPrediction> {
    fn publish(&mut self, prediction: &FlowPrediction) -> io::Result<()> {
        self.push(prediction.clone());
        Ok(())
    }
}
