//! Background filter previews
//!
//! The thread owning a [`Composition`] is its only writer. Expensive filter
//! runs can still happen elsewhere: the owner takes an immutable snapshot of
//! a node's input, submits it here, and keeps working. Results come back
//! through a channel; only the newest submission for a layer is delivered,
//! older ones are dropped on arrival. Running computations are never
//! interrupted.
//!
//! ```text
//! owner ──submit──▶ [job channel] ──▶ worker threads
//!   ▲                                      │
//!   └────poll──── [result channel] ◀───────┘
//! ```

use crate::composition::Composition;
use crate::events::CompositionEvent;
use crate::filter::{Filter, FilterRun};
use crate::layer::{HolderRef, LayerId, LayerKind};
use crate::pixel::PixelBuffer;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Worker statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs handed to the worker
    pub submitted: u64,
    /// Jobs whose filter finished
    pub completed: u64,
    /// Results dropped because a newer job for the same layer exists
    pub discarded: u64,
}

struct PreviewJob {
    ticket: u64,
    layer: LayerId,
    epoch: u64,
    filter: Box<dyn Filter>,
    input: PixelBuffer,
    composition: String,
    layer_name: String,
    lenient: bool,
}

/// Finished preview
#[derive(Debug)]
pub struct PreviewResult {
    /// Submission number, increasing per worker
    pub ticket: u64,
    /// Layer the preview is for
    pub layer: LayerId,
    /// Cache epoch (smart filter) or revision (image layer) at submission
    pub epoch: u64,
    /// Filter output
    pub output: Result<PixelBuffer>,
}

/// Pool of threads running filters on snapshots
pub struct PreviewWorker {
    job_tx: Option<Sender<PreviewJob>>,
    result_rx: Receiver<PreviewResult>,
    latest: HashMap<LayerId, u64>,
    next_ticket: u64,
    stats: Arc<parking_lot::RwLock<WorkerStats>>,
    threads: Vec<JoinHandle<()>>,
}

impl PreviewWorker {
    /// Start `threads` worker threads (at least one)
    pub fn new(threads: usize) -> Result<Self> {
        let (job_tx, job_rx) = unbounded::<PreviewJob>();
        let (result_tx, result_rx) = unbounded();
        let stats = Arc::new(parking_lot::RwLock::new(WorkerStats::default()));

        let mut handles = Vec::new();
        for index in 0..threads.max(1) {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let stats = stats.clone();
            let handle = thread::Builder::new()
                .name(format!("strata-preview-{}", index))
                .spawn(move || {
                    debug!("Preview thread {} started", index);
                    while let Ok(job) = job_rx.recv() {
                        let start = Instant::now();
                        let run = FilterRun {
                            composition: &job.composition,
                            layer: &job.layer_name,
                            lenient: job.lenient,
                        };
                        let output = run.apply(job.filter.as_ref(), &job.input);
                        stats.write().completed += 1;
                        debug!(
                            "Preview #{} ({}) took {:.1} ms",
                            job.ticket,
                            job.filter.name(),
                            start.elapsed().as_secs_f64() * 1000.0
                        );
                        let result = PreviewResult {
                            ticket: job.ticket,
                            layer: job.layer,
                            epoch: job.epoch,
                            output,
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                    debug!("Preview thread {} stopped", index);
                })?;
            handles.push(handle);
        }
        info!("Started {} preview threads", handles.len());

        Ok(Self {
            job_tx: Some(job_tx),
            result_rx,
            latest: HashMap::new(),
            next_ticket: 0,
            stats,
            threads: handles,
        })
    }

    /// Queue a filter run over a snapshot of `layer`'s input. Returns the
    /// ticket of the job.
    ///
    /// The run is checked like an in-place one: strict unless `comp` is
    /// configured as unattended, with errors naming `comp` and the layer.
    pub fn submit(
        &mut self,
        comp: &Composition,
        layer: LayerId,
        filter: Box<dyn Filter>,
        input: PixelBuffer,
    ) -> Result<u64> {
        let epoch = comp.preview_epoch(layer)?;
        let layer_name = comp.layer(layer)?.name().to_string();
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.latest.insert(layer, ticket);
        self.stats.write().submitted += 1;

        let job = PreviewJob {
            ticket,
            layer,
            epoch,
            filter,
            input,
            composition: comp.name().to_string(),
            layer_name,
            lenient: comp.config().unattended,
        };
        if let Some(tx) = &self.job_tx {
            if tx.send(job).is_err() {
                warn!("Preview threads are gone, job #{} dropped", ticket);
            }
        }
        Ok(ticket)
    }

    fn is_newest(&mut self, result: &PreviewResult) -> bool {
        let newest = self.latest.get(&result.layer) == Some(&result.ticket);
        if newest {
            self.latest.remove(&result.layer);
        } else {
            self.stats.write().discarded += 1;
            debug!("Discarding stale preview #{}", result.ticket);
        }
        newest
    }

    /// Results that arrived so far, stale ones removed
    pub fn poll(&mut self) -> Vec<PreviewResult> {
        let arrived: Vec<PreviewResult> = self.result_rx.try_iter().collect();
        arrived
            .into_iter()
            .filter(|result| self.is_newest(result))
            .collect()
    }

    /// Wait up to `timeout` for the next current result
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<PreviewResult> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.result_rx.recv_timeout(remaining) {
                Ok(result) if self.is_newest(&result) => return Some(result),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Whether results are still expected
    pub fn has_pending(&self) -> bool {
        !self.latest.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> WorkerStats {
        *self.stats.read()
    }
}

impl Drop for PreviewWorker {
    fn drop(&mut self) {
        // Closing the job channel ends the worker loops
        self.job_tx.take();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Composition {
    /// Validity stamp to submit with a preview of `id`
    pub fn preview_epoch(&self, id: LayerId) -> Result<u64> {
        Ok(match &self.layer(id)?.kind {
            LayerKind::SmartFilter(sf) => sf.cache.epoch(),
            _ => self.revision,
        })
    }

    /// Take in a finished preview. Returns false if it no longer applies
    /// because the layer is gone or changed since submission.
    ///
    /// For a smart filter the output becomes the node's raw cache; for an
    /// image layer it replaces the pixels.
    pub fn accept_preview(&mut self, result: PreviewResult) -> Result<bool> {
        if !self.contains(result.layer) {
            return Ok(false);
        }
        let output = result.output?;
        let id = result.layer;
        match &mut self.layer_mut(id)?.kind {
            LayerKind::SmartFilter(sf) => {
                if !sf.cache.store_if_current(result.epoch, output) {
                    return Ok(false);
                }
                let next = sf.next;
                let so = self.owner_of(id)?;
                if let Some(next) = next {
                    self.invalidate_chain(next)?;
                }
                self.invalidate_holder_chain(HolderRef::Layer(so));
                self.publish(CompositionEvent::IconStale(so));
                Ok(true)
            }
            LayerKind::Image(_) => {
                if result.epoch != self.revision {
                    return Ok(false);
                }
                self.set_image_pixels(id, output)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::filter::{Invert, NoOp};
    use crate::layer::Layer;
    use crate::CoreError;
    use image::Rgba;

    fn with_noop_filter(config: EngineConfig) -> (Composition, LayerId) {
        let mut content = Composition::new("content", 2, 2);
        content
            .add_layer(HolderRef::Root, Layer::fill("red", Rgba([255, 0, 0, 255])))
            .unwrap();
        let mut comp = Composition::with_config("doc", 2, 2, config);
        let so = comp
            .add_layer(HolderRef::Root, Layer::smart_object("so", content))
            .unwrap();
        let noop = comp.add_smart_filter(so, "noop", Box::new(NoOp)).unwrap();
        (comp, noop)
    }

    #[test]
    fn test_newest_result_wins() {
        let mut comp = Composition::new("doc", 2, 2);
        let pixels = PixelBuffer::filled(2, 2, Rgba([0, 0, 0, 255])).unwrap();
        let id = comp
            .add_layer(HolderRef::Root, Layer::image("img", pixels.clone()))
            .unwrap();

        let mut worker = PreviewWorker::new(1).unwrap();
        let first = worker
            .submit(&comp, id, Box::new(Invert), pixels.clone())
            .unwrap();
        let second = worker.submit(&comp, id, Box::new(Invert), pixels).unwrap();
        assert!(first < second);

        let result = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.ticket, second);
        assert!(!worker.has_pending());
        assert!(comp.accept_preview(result).unwrap());

        let stats = worker.stats();
        assert_eq!(stats.submitted, 2);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_preview_enforces_filter_contract() {
        let (mut comp, noop) = with_noop_filter(EngineConfig::default());
        let input = comp.smart_filter_input(noop).unwrap();

        let mut worker = PreviewWorker::new(1).unwrap();
        worker.submit(&comp, noop, Box::new(NoOp), input).unwrap();
        let result = worker.recv_timeout(Duration::from_secs(5)).unwrap();

        let err = comp.accept_preview(result).unwrap_err();
        assert!(matches!(
            &err,
            CoreError::FilterContractViolation { composition, layer, .. }
                if composition == "doc" && layer == "noop"
        ));
        assert_eq!(
            err.to_string(),
            "Filter 'No Operation' returned its input buffer (composition 'doc', layer 'noop')"
        );
    }

    #[test]
    fn test_unattended_preview_tolerates_identity_filter() {
        let config = EngineConfig {
            unattended: true,
            ..Default::default()
        };
        let (mut comp, noop) = with_noop_filter(config);
        let input = comp.smart_filter_input(noop).unwrap();

        let mut worker = PreviewWorker::new(1).unwrap();
        worker.submit(&comp, noop, Box::new(NoOp), input).unwrap();
        let result = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.output.is_ok());
        assert!(comp.accept_preview(result).unwrap());
    }
}
