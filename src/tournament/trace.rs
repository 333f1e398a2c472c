//! Per-match trace capture.
//!
//! Candidate and rationale texts are recorded as blake3 fingerprints so a
//! trace can be shared without leaking hypothesis text.

use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::candidate::ComparisonMode;

#[derive(Debug, Clone, Serialize)]
pub struct MatchTrace {
    pub timestamp_ms: i64,
    pub run_id: Option<Uuid>,
    pub cycle: Option<u32>,
    pub round: usize,
    /// Position within the round's schedule.
    pub match_index: usize,
    pub mode: ComparisonMode,
    pub first_id: String,
    pub second_id: String,
    pub first_hash: String,
    pub second_hash: String,
    pub winner_id: Option<String>,
    pub rationale_hash: Option<String>,
    pub winner_rating_before: Option<f64>,
    pub winner_rating_after: Option<f64>,
    pub loser_rating_before: Option<f64>,
    pub loser_rating_after: Option<f64>,
    pub attempts: u32,
    pub turns: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub provider_cost_nanodollars: i64,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("trace channel closed")]
    Closed,
    #[error("trace worker failed: {0}")]
    Join(String),
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: MatchTrace) -> Result<(), TraceError>;
}

/// Appends one JSON object per line from a background thread.
#[derive(Clone)]
pub struct JsonlTraceSink {
    sender: mpsc::Sender<MatchTrace>,
}

/// Owns the writer thread; join after dropping every sink clone.
pub struct TraceWorker {
    handle: Option<std::thread::JoinHandle<Result<(), TraceError>>>,
}

impl TraceWorker {
    pub fn join(mut self) -> Result<(), TraceError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(TraceError::Join("trace worker panicked".to_string()))),
            None => Ok(()),
        }
    }
}

impl JsonlTraceSink {
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = std::fs::File::create(path)?;
        let (sender, receiver) = mpsc::channel::<MatchTrace>();
        let handle = std::thread::spawn(move || write_trace_loop(file, receiver));
        Ok((
            Self { sender },
            TraceWorker {
                handle: Some(handle),
            },
        ))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, event: MatchTrace) -> Result<(), TraceError> {
        self.sender.send(event).map_err(|_| TraceError::Closed)
    }
}

fn write_trace_loop(
    file: std::fs::File,
    receiver: mpsc::Receiver<MatchTrace>,
) -> Result<(), TraceError> {
    let mut writer = BufWriter::new(file);
    for event in receiver {
        let line = serde_json::to_string(&event).map_err(|e| TraceError::Serde(e.to_string()))?;
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn text_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
