//! Dedicated-worker execution: run one analysis request on its own thread
//! so segmentation and classification never block the interaction surface.
//!
//! There is no cancellation: once spawned, a request runs to completion or
//! failure. Callers that stop caring simply drop the handle.

use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use crate::error::AnalysisError;
use crate::models::DiagnosisResult;
use crate::pipeline::LeafPipeline;

/// Handle to one in-flight analysis request.
pub struct AnalysisHandle {
    receiver: Receiver<Result<DiagnosisResult, AnalysisError>>,
    thread: thread::JoinHandle<()>,
}

impl AnalysisHandle {
    /// Block until the request finishes and take its result.
    pub fn wait(self) -> Result<DiagnosisResult, AnalysisError> {
        let outcome = self
            .receiver
            .recv()
            .unwrap_or(Err(AnalysisError::WorkerLost));
        let _ = self.thread.join();
        outcome
    }

    /// Non-blocking poll: `None` while the request is still running.
    pub fn try_result(&self) -> Option<Result<DiagnosisResult, AnalysisError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(AnalysisError::WorkerLost)),
        }
    }
}

/// Run one file analysis on a dedicated thread. The pipeline is shared;
/// its model sessions are already safe for concurrent invocation.
pub fn spawn_analysis(pipeline: Arc<LeafPipeline>, image_path: PathBuf) -> AnalysisHandle {
    let (sender, receiver) = sync_channel(1);
    let thread = thread::spawn(move || {
        let outcome = pipeline.analyze_file(&image_path);
        // A dropped handle means nobody wants the result anymore.
        let _ = sender.send(outcome);
    });
    AnalysisHandle { receiver, thread }
}
