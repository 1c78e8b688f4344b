//! Progress reporting for long-running transcriptions.
//!
//! Events are informative only. A run is complete when its future resolves,
//! not when [`Step::Done`] is observed.

use std::fmt;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Named pipeline steps, always emitted in this order for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Uploading,
    Transcribing,
    Processing,
    Done,
}

impl Step {
    pub fn index(self) -> u8 {
        match self {
            Step::Uploading => 0,
            Step::Transcribing => 1,
            Step::Processing => 2,
            Step::Done => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Step::Uploading => "uploading",
            Step::Transcribing => "transcribing",
            Step::Processing => "processing",
            Step::Done => "done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Step { step: Step },
    /// A chunk finished transcribing. `index` is zero-based.
    ChunkDone { index: usize, total: usize },
    /// A chunk failed and was dropped from the result.
    ChunkFailed {
        index: usize,
        total: usize,
        error: String,
    },
}

/// Receiver of progress events, shared by all concurrent chunk workers.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: ProgressEvent);
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn notify(&self, event: ProgressEvent) {
        // a dropped receiver just means nobody is listening anymore
        let _ = self.send(event);
    }
}

/// Collects events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct ProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Only the named steps, in emission order.
    pub fn steps(&self) -> Vec<Step> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Step { step } => Some(step),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for ProgressLog {
    fn notify(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Optional sink plumbing used throughout the pipeline.
pub(crate) fn report(sink: Option<&dyn ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink {
        sink.notify(event);
    }
}

pub(crate) fn report_step(sink: Option<&dyn ProgressSink>, step: Step) {
    report(sink, ProgressEvent::Step { step });
}
