mod common;

use async_trait::async_trait;
use billing_ledger_service::config::JobConfig;
use billing_ledger_service::error::{LedgerError, LedgerResult};
use billing_ledger_service::jobs::{JobHandler, JobProgress, JobRunner, LedgerJobHandler};
use billing_ledger_service::models::{
    Campaign, CampaignAudience, ChargeCategory, JobPayload, JobResult, JobStatus, NewCharge,
    OfficeJob,
};
use billing_ledger_service::services::{
    Clock, LogNotifier, MutationContext, Notifier, NotifierError, SystemClock,
};
use billing_ledger_service::startup::Ledger;
use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn config(max_attempts: u32) -> JobConfig {
    JobConfig {
        worker_count: 2,
        queue_size: 16,
        max_attempts,
        attempt_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(100),
    }
}

fn payload() -> JobPayload {
    JobPayload::GenerateReceipts {
        payment_ids: Vec::new(),
    }
}

fn empty_receipts() -> JobResult {
    JobResult::Receipts {
        receipts: Vec::new(),
    }
}

fn runner(config: JobConfig, handler: Arc<dyn JobHandler>) -> JobRunner {
    init_tracing();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    JobRunner::new(config, handler, clock)
}

/// Poll until the job reaches a terminal status.
async fn settle(runner: &JobRunner, job_id: Uuid) -> OfficeJob {
    for _ in 0..1000 {
        let job = runner.get(job_id).unwrap();
        if job.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never settled", job_id);
}

/// Fails the first `failures` attempts across all jobs, then succeeds.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl JobHandler for Flaky {
    async fn handle(&self, _job: &OfficeJob, _progress: &JobProgress) -> LedgerResult<JobResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LedgerError::JobHandler(format!("boom {}", call + 1)));
        }
        Ok(empty_receipts())
    }
}

struct Sleepy {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl JobHandler for Sleepy {
    async fn handle(&self, _job: &OfficeJob, progress: &JobProgress) -> LedgerResult<JobResult> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        progress.set(50);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(empty_receipts())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_attempts_are_retried_until_done() {
    let handler = Flaky::new(2);
    let runner = runner(config(3), handler.clone());
    runner.start();

    let job = runner.enqueue(payload(), ACTOR).unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn job_fails_once_attempts_run_out() {
    let runner = runner(config(2), Flaky::new(usize::MAX));
    runner.start();

    let job = runner.enqueue(payload(), ACTOR).unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.error.as_deref(), Some("job handler failed: boom 2"));
    assert!(job.finished_utc.is_some());
}

#[tokio::test(start_paused = true)]
async fn slow_attempts_time_out() {
    let handler = Arc::new(Sleepy {
        delay: Duration::from_secs(60),
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut config = config(1);
    config.attempt_timeout = Duration::from_secs(1);
    let runner = runner(config, handler);
    runner.start();

    let job = runner.enqueue(payload(), ACTOR).unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("job attempt timed out after 1s"));
}

#[tokio::test(start_paused = true)]
async fn operator_retry_gets_a_fresh_budget() {
    let runner = runner(config(1), Flaky::new(2));
    runner.start();

    let job = runner.enqueue(payload(), ACTOR).unwrap();
    assert_eq!(settle(&runner, job.job_id).await.status, JobStatus::Failed);

    let requeued = runner.retry(job.job_id).unwrap();
    assert_eq!(requeued.status, JobStatus::Queued);
    assert_eq!(requeued.attempts, 0);
    assert_eq!(settle(&runner, job.job_id).await.status, JobStatus::Failed);

    runner.retry(job.job_id).unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 1);

    let err = runner.retry(job.job_id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    assert!(matches!(
        runner.retry(Uuid::new_v4()),
        Err(LedgerError::NotFound { .. })
    ));
}

#[tokio::test]
async fn full_queue_rejects_new_jobs() {
    let mut config = config(1);
    config.queue_size = 1;
    // never started, so nothing drains the channel
    let runner = runner(config, Flaky::new(0));

    runner.enqueue(payload(), ACTOR).unwrap();
    let err = runner.enqueue(payload(), ACTOR).unwrap_err();
    assert_eq!(err, LedgerError::QueueFull);
    assert_eq!(runner.list().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn attempts_never_exceed_worker_count() {
    let handler = Arc::new(Sleepy {
        delay: Duration::from_millis(200),
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let runner = runner(config(1), handler.clone());
    runner.start();

    let ids: Vec<Uuid> = (0..6)
        .map(|_| runner.enqueue(payload(), ACTOR).unwrap().job_id)
        .collect();
    for id in &ids {
        assert_eq!(settle(&runner, *id).await.status, JobStatus::Done);
    }
    assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
    assert_eq!(runner.list().len(), 6);

    runner.shutdown().await;
}

#[tokio::test]
async fn ledger_handler_closes_periods_and_sends_campaigns() {
    let TestLedger { ledger, .. } = common::ledger();
    let ledger = Arc::new(ledger);
    let plot = add_plot(&ledger, "21", None);
    add_charge(&ledger, plot.plot_id, "2025-01", 4000);
    let notifier = Arc::new(LogNotifier::new());

    let handler = Arc::new(LedgerJobHandler::new(ledger.clone(), notifier.clone()));
    let runner = runner(config(2), handler);
    runner.start();

    let close = runner
        .enqueue(JobPayload::ClosePeriod { month: month("2025-01") }, ACTOR)
        .unwrap();
    let close = settle(&runner, close.job_id).await;
    assert_eq!(close.status, JobStatus::Done);
    match close.result {
        Some(JobResult::PeriodClosed { record }) => {
            assert_eq!(record.month, month("2025-01"));
            assert_eq!(record.closed_by, ACTOR);
            assert_eq!(record.snapshot.debt_total, money(4000));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(ledger.snapshot().is_closed(month("2025-01")));

    let campaign = Campaign {
        template: "Plot {plot}: please pay {debt}".to_string(),
        audience: CampaignAudience::Recipients {
            recipients: vec![plot.contact.clone().unwrap(), " ".to_string()],
        },
    };
    let send = runner
        .enqueue(JobPayload::SendCampaign { campaign }, ACTOR)
        .unwrap();
    let send = settle(&runner, send.job_id).await;
    assert_eq!(send.status, JobStatus::Done);
    match send.result {
        Some(JobResult::Campaign { summary }) => {
            assert_eq!(summary.attempted, 2);
            assert_eq!(summary.sent, 1);
            assert_eq!(summary.failed.len(), 1);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(notifier.send_count(), 1);

    runner.shutdown().await;
}

#[tokio::test]
async fn ledger_errors_fail_the_job_with_their_message() {
    let TestLedger { ledger, .. } = common::ledger();
    let handler = Arc::new(LedgerJobHandler::new(
        Arc::new(ledger),
        Arc::new(LogNotifier::new()),
    ));
    let runner = runner(config(1), handler);
    runner.start();

    let job = runner
        .enqueue(
            JobPayload::GenerateReceipts {
                payment_ids: vec![Uuid::new_v4()],
            },
            ACTOR,
        )
        .unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("not found"));
}

/// Writes a charge through the attempt's gate, but only after the deadline.
struct LateCharge {
    ledger: Arc<Ledger>,
    plot_id: Uuid,
    delay: Duration,
}

#[async_trait]
impl JobHandler for LateCharge {
    async fn handle(&self, job: &OfficeJob, progress: &JobProgress) -> LedgerResult<JobResult> {
        let ledger = self.ledger.clone();
        let plot_id = self.plot_id;
        let delay = self.delay;
        let ctx = MutationContext::new(job.requested_by.clone()).within_attempt(progress.gate().clone());
        tokio::task::spawn_blocking(move || {
            std::thread::sleep(delay);
            ledger.create_charge(
                NewCharge {
                    plot_id,
                    month: month("2025-02"),
                    category: ChargeCategory::Membership,
                    amount: money(500),
                    note: None,
                    due_date: None,
                },
                &ctx,
            )
        })
        .await
        .map_err(|e| LedgerError::JobHandler(e.to_string()))??;
        Ok(empty_receipts())
    }
}

#[tokio::test]
async fn timed_out_attempt_never_commits_its_changes() {
    let TestLedger { ledger, .. } = common::ledger();
    let ledger = Arc::new(ledger);
    let plot = add_plot(&ledger, "30", None);

    let handler = Arc::new(LateCharge {
        ledger: ledger.clone(),
        plot_id: plot.plot_id,
        delay: Duration::from_millis(300),
    });
    let mut config = config(1);
    config.attempt_timeout = Duration::from_millis(50);
    let runner = runner(config, handler);
    runner.start();

    let job = runner.enqueue(payload(), ACTOR).unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("timed out"));

    // the blocking closure is still running; give it time to try its commit
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(ledger.snapshot().charges().count(), 0);

    runner.shutdown().await;
}

/// Stalls on the first delivery to `stall_on`, recording every finished send.
struct StallingNotifier {
    stall_on: String,
    stalled: AtomicBool,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for StallingNotifier {
    async fn send(&self, _text: &str, recipient: &str) -> Result<(), NotifierError> {
        if recipient == self.stall_on && !self.stalled.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.sent.lock().unwrap().push(recipient.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn retried_campaign_skips_recipients_already_messaged() {
    let TestLedger { ledger, .. } = common::ledger();
    let ledger = Arc::new(ledger);
    let first = add_plot(&ledger, "41", None).contact.unwrap();
    let second = add_plot(&ledger, "42", None).contact.unwrap();

    let notifier = Arc::new(StallingNotifier {
        stall_on: second.clone(),
        stalled: AtomicBool::new(false),
        sent: Mutex::new(Vec::new()),
    });
    let handler = Arc::new(LedgerJobHandler::new(ledger, notifier.clone()));
    let mut config = config(2);
    config.attempt_timeout = Duration::from_millis(200);
    let runner = runner(config, handler);
    runner.start();

    let campaign = Campaign {
        template: "Plot {plot}: please pay {debt}".to_string(),
        audience: CampaignAudience::Recipients {
            recipients: vec![first.clone(), second.clone()],
        },
    };
    let job = runner
        .enqueue(JobPayload::SendCampaign { campaign }, ACTOR)
        .unwrap();
    let job = settle(&runner, job.job_id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.attempts, 2);
    match job.result {
        Some(JobResult::Campaign { summary }) => {
            assert_eq!(summary.attempted, 2);
            assert_eq!(summary.already_sent, 1);
            assert_eq!(summary.sent, 1);
            assert!(summary.failed.is_empty());
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(*notifier.sent.lock().unwrap(), vec![first, second]);

    runner.shutdown().await;
}
