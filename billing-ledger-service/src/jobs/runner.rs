use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::JobConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::jobs::handler::JobHandler;
use crate::models::{JobPayload, JobTransition, OfficeJob};
use crate::services::clock::Clock;
use crate::services::guard::AttemptGate;
use crate::services::metrics::{record_job, JOB_ATTEMPT_DURATION};

type JobTable = Arc<Mutex<BTreeMap<Uuid, OfficeJob>>>;

fn lock(jobs: &JobTable) -> MutexGuard<'_, BTreeMap<Uuid, OfficeJob>> {
    jobs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lets a handler report coarse progress on the job it is running, and
/// carries the attempt's commit gate.
#[derive(Clone)]
pub struct JobProgress {
    job_id: Uuid,
    jobs: JobTable,
    clock: Arc<dyn Clock>,
    gate: AttemptGate,
}

impl JobProgress {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Ledger mutations of this attempt must go through this gate so that a
    /// timed-out attempt never commits.
    pub fn gate(&self) -> &AttemptGate {
        &self.gate
    }

    /// Recipients already delivered to by earlier attempts of this job.
    pub fn delivered(&self) -> Vec<String> {
        lock(&self.jobs)
            .get(&self.job_id)
            .map(|job| job.delivered.clone())
            .unwrap_or_default()
    }

    pub fn mark_delivered(&self, recipient: &str) {
        if let Some(job) = lock(&self.jobs).get_mut(&self.job_id) {
            job.delivered.push(recipient.to_string());
        }
    }

    pub fn set(&self, progress: u8) {
        if let Some(job) = lock(&self.jobs).get_mut(&self.job_id) {
            job.set_progress(progress, self.clock.now());
        }
    }
}

/// Runs office jobs on a bounded worker pool.
///
/// Jobs are queued by id on a bounded channel. A distributor task hands them
/// to workers; at most `worker_count` attempts run at once. A failed attempt
/// is re-sent to the channel after its backoff delay.
pub struct JobRunner {
    config: JobConfig,
    jobs: JobTable,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    job_tx: mpsc::Sender<Uuid>,
    job_rx: Mutex<Option<mpsc::Receiver<Uuid>>>,
    shutdown_token: CancellationToken,
}

impl JobRunner {
    pub fn new(config: JobConfig, handler: Arc<dyn JobHandler>, clock: Arc<dyn Clock>) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            config,
            jobs: Arc::new(Mutex::new(BTreeMap::new())),
            handler,
            clock,
            job_tx,
            job_rx: Mutex::new(Some(job_rx)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Spawn the distributor. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(mut job_rx) = self
            .job_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            tracing::warn!("Job runner already started");
            return;
        };

        let worker_count = self.config.worker_count.max(1);
        tracing::info!(worker_count, "Starting job runner");

        let workers: Vec<Worker> = (0..worker_count)
            .map(|id| Worker {
                id,
                config: self.config,
                jobs: self.jobs.clone(),
                handler: self.handler.clone(),
                clock: self.clock.clone(),
                job_tx: self.job_tx.clone(),
                shutdown: self.shutdown_token.clone(),
            })
            .collect();
        let slots = Arc::new(Semaphore::new(worker_count));
        let shutdown = self.shutdown_token.clone();

        tokio::spawn(async move {
            let mut next_worker = 0;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Job distributor shutting down");
                        break;
                    }
                    job_id = job_rx.recv() => {
                        let Some(job_id) = job_id else {
                            tracing::info!("Channel closed, job distributor exiting");
                            break;
                        };
                        let Ok(permit) = slots.clone().acquire_owned().await else {
                            break;
                        };

                        // Round-robin distribution
                        let worker = workers[next_worker].clone();
                        next_worker = (next_worker + 1) % workers.len();

                        tracing::debug!(worker_id = worker.id, %job_id, "Dispatching job to worker");
                        tokio::spawn(async move {
                            worker.process_job(job_id).await;
                            drop(permit);
                        });
                    }
                }
            }
        });
    }

    pub fn enqueue(&self, payload: JobPayload, requested_by: &str) -> LedgerResult<OfficeJob> {
        let job = OfficeJob::new(
            payload,
            requested_by,
            self.config.max_attempts,
            self.clock.now(),
        );
        lock(&self.jobs).insert(job.job_id, job.clone());

        if self.job_tx.try_send(job.job_id).is_err() {
            lock(&self.jobs).remove(&job.job_id);
            tracing::warn!(job_type = %job.job_type, "Job queue full");
            return Err(LedgerError::QueueFull);
        }

        tracing::info!(job_id = %job.job_id, job_type = %job.job_type, "Job enqueued");
        Ok(job)
    }

    pub fn get(&self, job_id: Uuid) -> LedgerResult<OfficeJob> {
        lock(&self.jobs)
            .get(&job_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("job", job_id))
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<OfficeJob> {
        let mut jobs: Vec<OfficeJob> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        jobs
    }

    /// Put a failed job back on the queue with a fresh attempt budget.
    pub fn retry(&self, job_id: Uuid) -> LedgerResult<OfficeJob> {
        let (before, after) = {
            let mut jobs = lock(&self.jobs);
            let job = jobs
                .get_mut(&job_id)
                .ok_or_else(|| LedgerError::not_found("job", job_id))?;
            let before = job.clone();
            job.requeue(self.clock.now())?;
            (before, job.clone())
        };

        if self.job_tx.try_send(job_id).is_err() {
            lock(&self.jobs).insert(job_id, before);
            return Err(LedgerError::QueueFull);
        }

        tracing::info!(%job_id, job_type = %after.job_type, "Job re-queued by operator");
        Ok(after)
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating job runner shutdown");
        self.shutdown_token.cancel();
    }
}

#[derive(Clone)]
struct Worker {
    id: usize,
    config: JobConfig,
    jobs: JobTable,
    handler: Arc<dyn JobHandler>,
    clock: Arc<dyn Clock>,
    job_tx: mpsc::Sender<Uuid>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Move the job to `running` and hand back a copy for the handler.
    fn begin(&self, job_id: Uuid) -> Option<OfficeJob> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&job_id)?;
        match job.start(self.clock.now()) {
            Ok(()) => Some(job.clone()),
            Err(err) => {
                tracing::warn!(worker_id = self.id, %job_id, error = %err, "Skipping job");
                None
            }
        }
    }

    async fn process_job(&self, job_id: Uuid) {
        let Some(job) = self.begin(job_id) else {
            return;
        };
        let job_type = job.job_type;
        let start = Instant::now();

        tracing::info!(
            worker_id = self.id,
            %job_id,
            %job_type,
            attempt = job.attempts,
            "Job attempt started"
        );

        let gate = AttemptGate::new();
        let progress = JobProgress {
            job_id,
            jobs: self.jobs.clone(),
            clock: self.clock.clone(),
            gate: gate.clone(),
        };
        let attempt = self.handler.handle(&job, &progress);
        tokio::pin!(attempt);
        let timed = tokio::time::timeout(self.config.attempt_timeout, &mut attempt).await;
        let outcome = match timed {
            Ok(outcome) => outcome,
            Err(_) if gate.abandon() => Err(LedgerError::JobTimeout {
                seconds: self.config.attempt_timeout.as_secs(),
            }),
            Err(_) => {
                // Committed before the deadline, so the attempt stands.
                tracing::debug!(%job_id, "Attempt committed at its deadline, awaiting result");
                attempt.await
            }
        };

        JOB_ATTEMPT_DURATION
            .with_label_values(&[job_type.as_str()])
            .observe(start.elapsed().as_secs_f64());

        let now = self.clock.now();
        match outcome {
            Ok(result) => {
                if let Some(job) = lock(&self.jobs).get_mut(&job_id) {
                    if let Err(err) = job.complete(result, now) {
                        tracing::warn!(%job_id, error = %err, "Could not complete job");
                    }
                }
                record_job(job_type.as_str(), "done");
                tracing::info!(
                    worker_id = self.id,
                    %job_id,
                    %job_type,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job done"
                );
            }
            Err(err) => {
                let transition = lock(&self.jobs).get_mut(&job_id).map(|job| {
                    let backoff = self.config.backoff_for(job.attempts);
                    job.fail(err.to_string(), backoff, now)
                });
                match transition {
                    Some(Ok(JobTransition::Retry { delay })) => {
                        record_job(job_type.as_str(), "retry");
                        tracing::warn!(
                            %job_id,
                            %job_type,
                            error = %err,
                            delay_ms = delay.as_millis() as u64,
                            "Job attempt failed, retrying"
                        );
                        self.schedule_retry(job_id, delay);
                    }
                    Some(Ok(JobTransition::Failed)) => {
                        record_job(job_type.as_str(), "failed");
                        tracing::error!(%job_id, %job_type, error = %err, "Job failed after retries");
                    }
                    Some(Err(state_err)) => {
                        tracing::warn!(%job_id, error = %state_err, "Could not record job failure");
                    }
                    None => {}
                }
            }
        }
    }

    fn schedule_retry(&self, job_id: Uuid, delay: Duration) {
        let job_tx = self.job_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if job_tx.send(job_id).await.is_err() {
                        tracing::warn!(%job_id, "Job channel closed before retry");
                    }
                }
            }
        });
    }
}
