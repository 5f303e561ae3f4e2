//! Pose-detector seam and the detectors that ship with the crate.
//!
//! The real hand-pose model lives outside this crate. Anything that can hand
//! over zero or more [`Hand`]s per call plugs in through [`HandDetector`].

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::encoder::Hand;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector is not ready")]
    NotReady,
    #[error("no more frames")]
    Exhausted,
    #[error("failed to read frames: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame {line} is not a list of hands: {source}")]
    Frame {
        line: usize,
        source: serde_json::Error,
    },
}

/// Source of per-frame hand detections.
pub trait HandDetector {
    fn is_ready(&self) -> bool;

    /// Detect hands in the next frame.
    fn estimate_hands(&mut self) -> Result<Vec<Hand>, DetectorError>;
}

/// Replays recorded detections: one JSON array of hands per line.
pub struct JsonlDetector<R> {
    reader: R,
    line: usize,
    buf: String,
}

impl JsonlDetector<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> JsonlDetector<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: String::new(),
        }
    }
}

impl<R: BufRead> HandDetector for JsonlDetector<R> {
    fn is_ready(&self) -> bool {
        true
    }

    fn estimate_hands(&mut self) -> Result<Vec<Hand>, DetectorError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Err(DetectorError::Exhausted);
            }
            self.line += 1;
            let text = self.buf.trim();
            if text.is_empty() {
                continue;
            }
            return serde_json::from_str(text).map_err(|source| DetectorError::Frame {
                line: self.line,
                source,
            });
        }
    }
}

/// In-memory queue of frames, handy for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDetector {
    frames: VecDeque<Vec<Hand>>,
    ready: bool,
}

impl ScriptedDetector {
    pub fn new(frames: impl IntoIterator<Item = Vec<Hand>>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            ready: true,
        }
    }

    /// A detector that reports itself as still loading.
    pub fn not_ready() -> Self {
        Self {
            frames: VecDeque::new(),
            ready: false,
        }
    }

    pub fn push(&mut self, frame: Vec<Hand>) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl HandDetector for ScriptedDetector {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn estimate_hands(&mut self) -> Result<Vec<Hand>, DetectorError> {
        if !self.ready {
            return Err(DetectorError::NotReady);
        }
        self.frames.pop_front().ok_or(DetectorError::Exhausted)
    }
}
