use std::sync::mpsc;

use crate::error::PipelineError;
use crate::layer::{ComposeRequest, LayerId, LayerProperty};
use crate::ops::compose::{ComposeOptions, ComposeOutcome};
use crate::store::LayerStore;

/// A finished background composition, keyed by the store, layer and
/// generation it was computed for.
#[derive(Debug)]
pub struct CompositeResult {
    pub epoch: u64,
    pub layer_id: LayerId,
    pub generation: u64,
    pub outcome: ComposeOutcome,
}

/// What a poll applied to the store.
#[derive(Debug, Default)]
pub struct PollReport {
    pub applied: Vec<LayerId>,
    /// Results for layers that were deleted, edited again or replaced by a
    /// preset load in the meantime.
    pub discarded: Vec<LayerId>,
    pub warnings: Vec<(LayerId, PipelineError)>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.discarded.is_empty()
    }
}

/// Runs layer compositions on the rayon pool.
///
/// Results are delivered over a channel and only written back when the caller
/// polls, so the store keeps a single writer.  The store itself rejects
/// results whose layer is gone or whose generation is out of date.
pub struct CompositeWorker {
    sender: mpsc::Sender<CompositeResult>,
    receiver: mpsc::Receiver<CompositeResult>,
    pending_jobs: usize,
    options: ComposeOptions,
}

impl CompositeWorker {
    pub fn new(options: ComposeOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            pending_jobs: 0,
            options,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending_jobs
    }

    pub fn submit(&mut self, request: ComposeRequest) {
        let sender = self.sender.clone();
        let options = self.options;
        self.pending_jobs += 1;
        rayon::spawn(move || {
            let outcome = request.run(&options);
            let _ = sender.send(CompositeResult {
                epoch: request.epoch,
                layer_id: request.layer_id,
                generation: request.generation,
                outcome,
            });
        });
    }

    /// Apply an edit to `store` and, if the texture went stale, queue its
    /// recomposition.  Returns false when the layer does not exist.
    pub fn stage(&mut self, store: &mut LayerStore, id: LayerId, property: LayerProperty) -> bool {
        if store.layer(id).is_none() {
            return false;
        }
        if let Some(request) = store.stage_property(id, property) {
            self.submit(request);
        }
        true
    }

    /// Commit every result that has arrived, without blocking.
    pub fn poll(&mut self, store: &mut LayerStore) -> PollReport {
        let mut report = PollReport::default();
        while let Ok(result) = self.receiver.try_recv() {
            self.pending_jobs = self.pending_jobs.saturating_sub(1);
            Self::commit(store, result, &mut report);
        }
        report
    }

    /// Block until every submitted job has reported back.
    pub fn wait_all(&mut self, store: &mut LayerStore) -> PollReport {
        let mut report = PollReport::default();
        while self.pending_jobs > 0 {
            let Ok(result) = self.receiver.recv() else {
                break;
            };
            self.pending_jobs -= 1;
            Self::commit(store, result, &mut report);
        }
        report
    }

    fn commit(store: &mut LayerStore, mut result: CompositeResult, report: &mut PollReport) {
        let warning = result.outcome.warning.take();
        if store.commit_composite(
            result.epoch,
            result.layer_id,
            result.generation,
            result.outcome,
        ) {
            report.applied.push(result.layer_id);
            if let Some(w) = warning {
                report.warnings.push((result.layer_id, w));
            }
        } else {
            report.discarded.push(result.layer_id);
        }
    }
}
