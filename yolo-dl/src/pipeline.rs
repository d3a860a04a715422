//! Bounded producer/consumer queue feeding training records.

use crate::common::*;

#[derive(Debug, Clone)]
pub struct DataPipelineInit {
    /// The number of producer threads.
    pub num_workers: Option<usize>,
    /// The maximum number of records waiting in the queue.
    pub queue_size: Option<usize>,
}

impl Default for DataPipelineInit {
    fn default() -> Self {
        Self {
            num_workers: None,
            queue_size: None,
        }
    }
}

impl DataPipelineInit {
    pub const DEFAULT_QUEUE_SIZE: usize = 16;

    /// Spawns the producer threads.
    ///
    /// Each worker repeatedly calls `producer` with its worker index. The
    /// worker stops when the producer returns `Ok(None)` or an error, or when
    /// the pipeline is stopped.
    pub fn build<T, F>(self, producer: F) -> Result<DataPipeline<T>>
    where
        T: 'static + Send,
        F: 'static + Fn(usize) -> Result<Option<T>> + Send + Sync,
    {
        let Self {
            num_workers,
            queue_size,
        } = self;
        let num_workers = num_workers.unwrap_or_else(rayon::current_num_threads);
        let queue_size = queue_size.unwrap_or(Self::DEFAULT_QUEUE_SIZE);
        ensure!(num_workers > 0, "num_workers must be positive");
        ensure!(queue_size > 0, "queue_size must be positive");

        let (tx, rx) = flume::bounded(queue_size);
        let stop = Arc::new(AtomicBool::new(false));
        let producer = Arc::new(producer);

        let workers: Vec<_> = (0..num_workers)
            .map(|worker_index| {
                let tx = tx.clone();
                let stop = stop.clone();
                let producer = producer.clone();

                thread::Builder::new()
                    .name(format!("data-worker-{}", worker_index))
                    .spawn(move || -> Result<()> {
                        while !stop.load(atomic::Ordering::SeqCst) {
                            let record = match (*producer)(worker_index) {
                                Ok(Some(record)) => record,
                                Ok(None) => break,
                                Err(err) => {
                                    warn!("data worker {} failed: {:#}", worker_index, err);
                                    return Err(err);
                                }
                            };

                            if tx.send(record).is_err() {
                                break;
                            }
                        }
                        Ok(())
                    })
                    .with_context(|| format!("failed to spawn data worker {}", worker_index))
            })
            .collect::<Result<_>>()?;

        info!(
            "started {} data workers with queue size {}",
            num_workers, queue_size
        );

        Ok(DataPipeline { rx, stop, workers })
    }
}

/// Records produced by worker threads, consumed in arrival order.
#[derive(Debug)]
pub struct DataPipeline<T> {
    rx: flume::Receiver<T>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<Result<()>>>,
}

impl<T> DataPipeline<T> {
    /// Blocks until a record arrives. Returns `None` when every worker has
    /// finished and the queue is empty.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Collects up to `batch_size` records. The last batch may be shorter.
    pub fn next_batch(&self, batch_size: usize) -> Option<Vec<T>> {
        let batch: Vec<_> = iter::from_fn(|| self.recv()).take(batch_size).collect();
        (!batch.is_empty()).then(|| batch)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(atomic::Ordering::SeqCst)
    }

    /// Stops the workers, discards queued records and reports the first
    /// worker error.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, atomic::Ordering::SeqCst);

        // unblock workers waiting on a full queue until all senders are gone
        let num_dropped = self.rx.iter().count();
        debug!("dropped {} pending records on stop", num_dropped);

        let mut first_error = None;
        for (worker_index, worker) in self.workers.drain(..).enumerate() {
            let result = match worker.join() {
                Ok(result) => result,
                Err(_) => Err(format_err!("data worker {} panicked", worker_index)),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T> Drop for DataPipeline<T> {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!("data pipeline stopped with error: {:#}", err);
        }
    }
}
