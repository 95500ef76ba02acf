use image::RgbImage;
use moodgate_core::{FaceStatus, FaceTracker, FrameOutcome, FrameProcessor, TrackerConfig, ValidationSink};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::script::{ScriptedClassifier, ScriptedFrame, ScriptedMatcher};

/// Size of the synthetic frames scripted detections are cropped from.
pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine and every tracked face.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub frames_received: u64,
    pub frames_processed: u64,
    pub validation_step: u8,
    pub faces: Vec<FaceStatus>,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Process {
        frame: ScriptedFrame,
        reply: oneshot::Sender<Option<FrameOutcome>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Submit one frame. `None` means the frame fell between two sampled
    /// frames and was dropped.
    pub async fn process(&self, frame: ScriptedFrame) -> Result<Option<FrameOutcome>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Process {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

struct Engine<S> {
    processor: FrameProcessor<ScriptedMatcher, ScriptedClassifier, S>,
    frame: RgbImage,
    stride: u64,
    received: u64,
    processed: u64,
}

impl<S: ValidationSink> Engine<S> {
    fn new(sink: S, tracker: TrackerConfig, stride: usize) -> Self {
        Self {
            processor: FrameProcessor::new(
                ScriptedMatcher::default(),
                ScriptedClassifier::default(),
                sink,
                FaceTracker::with_config(tracker),
            ),
            frame: RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT),
            stride: stride.max(1) as u64,
            received: 0,
            processed: 0,
        }
    }

    fn process(&mut self, frame: ScriptedFrame) -> Option<FrameOutcome> {
        let index = self.received;
        self.received += 1;
        if index % self.stride != 0 {
            return None;
        }
        self.processed += 1;

        self.processor.matcher_mut().stage(frame.detections());
        self.processor.classifier_mut().stage(frame.emotion());
        let outcome = self.processor.process(&self.frame);
        tracing::debug!(frame = index, outcome = ?outcome, "frame processed");
        Some(outcome)
    }

    fn status(&self) -> EngineStatus {
        let tracker = self.processor.tracker();
        EngineStatus {
            frames_received: self.received,
            frames_processed: self.processed,
            validation_step: tracker.validation_step(),
            faces: tracker.faces_status(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the tracker and `sink` and serves requests until every
/// handle is dropped.
pub fn spawn_engine<S>(
    sink: S,
    tracker: TrackerConfig,
    stride: usize,
) -> Result<EngineHandle, EngineError>
where
    S: ValidationSink + Send + 'static,
{
    let mut engine = Engine::new(sink, tracker, stride);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("moodgate-engine".into())
        .spawn(move || {
            tracing::info!(stride = engine.stride, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Process { frame, reply } => {
                        let _ = reply.send(engine.process(frame));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(engine.status());
                    }
                }
            }
            tracing::info!(
                received = engine.received,
                processed = engine.processed,
                "engine thread exiting"
            );
        })?;

    Ok(EngineHandle { tx })
}
