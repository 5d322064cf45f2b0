//! Seams to the outside world: where frames come from, where results go,
//! and how a running loop is asked to stop.

use crate::frame::Frame;
use crate::types::{AnnotatedRegion, Region};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("failed to decode frame {name}: {reason}")]
    Decode { name: String, reason: String },
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplies grayscale frames one at a time.
pub trait FrameSource {
    /// Next frame, `Ok(None)` at end of stream, `Err` when no frame could be
    /// delivered this time.
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError>;
}

/// Receives annotated results for rendering.
pub trait DisplaySink {
    /// One recognition frame and its classified detections.
    fn present(&mut self, frame: &Frame, detections: &[AnnotatedRegion]);

    /// Called after each enrollment frame with the regions just stored.
    fn capture_progress(&mut self, _frame: &Frame, _regions: &[Region], _collected: usize, _target: usize) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&mut self, _frame: &Frame, _detections: &[AnnotatedRegion]) {}
}

/// Cooperative cancellation flag, polled between frames only.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Replays a fixed list of source results; handy for tests and batch input.
#[derive(Debug, Default)]
pub struct VecSource {
    items: std::collections::VecDeque<Result<Frame, String>>,
}

impl VecSource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            items: frames.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a delivery failure at the current end of the list.
    pub fn push_failure(&mut self, reason: impl Into<String>) {
        self.items.push_back(Err(reason.into()));
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.items.push_back(Ok(frame));
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

impl FrameSource for VecSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        match self.items.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(reason)) => Err(FrameSourceError::Unavailable(reason)),
            None => Ok(None),
        }
    }
}
