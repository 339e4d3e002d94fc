//! Batch face cropping on a dedicated worker thread.
//!
//! Fetching and detecting is slow, so it runs off the controlling thread.
//! The worker never touches the catalog: it replies with the crops and the
//! caller applies them (see `Corpus::apply_batch`).

use crate::vision::{crop_faces, CroppedFace, FaceDetector, ImageLoader};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use url::Url;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread exited")]
    ChannelClosed,
}

/// A reference that produced exactly one face.
#[derive(Debug, Clone)]
pub struct AcceptedFace {
    pub reference: Url,
    pub face: CroppedFace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    LoadFailed(String),
    DetectionFailed(String),
    /// Zero or several faces; only single-face images are usable for training.
    FaceCount(usize),
}

#[derive(Debug, Clone)]
pub struct SkippedReference {
    pub reference: Url,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<AcceptedFace>,
    pub skipped: Vec<SkippedReference>,
}

enum WorkerRequest {
    CropBatch {
        references: Vec<Url>,
        reply: oneshot::Sender<BatchOutcome>,
    },
}

/// Clone-safe handle to the worker thread.
#[derive(Clone)]
pub struct BatchHandle {
    tx: mpsc::Sender<WorkerRequest>,
}

impl BatchHandle {
    /// Load, detect and crop every reference on the worker.
    pub async fn crop_batch(&self, references: Vec<Url>) -> Result<BatchOutcome, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(WorkerRequest::CropBatch {
                references,
                reply: reply_tx,
            })
            .await
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Same as [`crop_batch`](Self::crop_batch) for callers outside an async runtime.
    pub fn blocking_crop_batch(&self, references: Vec<Url>) -> Result<BatchOutcome, WorkerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .blocking_send(WorkerRequest::CropBatch {
                references,
                reply: reply_tx,
            })
            .map_err(|_| WorkerError::ChannelClosed)?;
        reply_rx.blocking_recv().map_err(|_| WorkerError::ChannelClosed)
    }
}

/// Spawn the worker on its own OS thread. It exits once every handle is dropped.
pub fn spawn_batch_worker<L, D>(mut loader: L, mut detector: D) -> Result<BatchHandle, WorkerError>
where
    L: ImageLoader + Send + 'static,
    D: FaceDetector + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<WorkerRequest>(4);

    std::thread::Builder::new()
        .name("facecorpus-batch".into())
        .spawn(move || {
            tracing::info!("batch worker started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    WorkerRequest::CropBatch { references, reply } => {
                        let outcome = run_batch(&mut loader, &mut detector, references);
                        let _ = reply.send(outcome);
                    }
                }
            }
            tracing::info!("batch worker exiting");
        })?;

    Ok(BatchHandle { tx })
}

fn run_batch<L, D>(loader: &mut L, detector: &mut D, references: Vec<Url>) -> BatchOutcome
where
    L: ImageLoader + ?Sized,
    D: FaceDetector + ?Sized,
{
    let total = references.len();
    let mut outcome = BatchOutcome::default();

    for (i, reference) in references.into_iter().enumerate() {
        let image = match loader.load(&reference) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!(%reference, error = %e, "batch: load failed");
                outcome.skipped.push(SkippedReference {
                    reference,
                    reason: SkipReason::LoadFailed(e.to_string()),
                });
                continue;
            }
        };

        match crop_faces(&image, detector) {
            Ok(mut faces) if faces.len() == 1 => {
                if let Some(face) = faces.pop() {
                    outcome.accepted.push(AcceptedFace { reference, face });
                }
            }
            Ok(faces) => outcome.skipped.push(SkippedReference {
                reference,
                reason: SkipReason::FaceCount(faces.len()),
            }),
            Err(e) => outcome.skipped.push(SkippedReference {
                reference,
                reason: SkipReason::DetectionFailed(e.to_string()),
            }),
        }
        tracing::trace!(done = i + 1, total, "batch progress");
    }

    tracing::info!(
        total,
        accepted = outcome.accepted.len(),
        skipped = outcome.skipped.len(),
        "batch finished"
    );
    outcome
}
