//! Resource-adaptive poll loop
//!
//! One cycle lists unread messages, runs the pipeline on each in order,
//! samples host load and picks the next sleep. A cycle that fails before
//! sampling (typically the mailbox listing) is logged and followed by the
//! failure backoff. [`PollScheduler::run_forever`] never returns.
//!
//! ```text
//! POLLING → PROCESSING → SAMPLING → SLEEPING → POLLING
//!     └──────── cycle failure ───────→ SLEEPING(failure)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, TimeDelta, Utc};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::PollConfig;
use crate::errors::AppResult;
use crate::gateway::MailboxGateway;
use crate::pipeline::{MessageOutcome, MessagePipeline};
use crate::resources::{ResourceSample, ResourceSampler};

/// Something that can wait
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Why a given sleep was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReason {
    Nominal,
    Degraded,
    AfterFailure,
}

/// How long to wait before the next cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDecision {
    pub sleep_seconds: u64,
    pub reason: PollReason,
}

impl PollDecision {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.sleep_seconds)
    }
}

/// Pure decision policy over samples and failures
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    config: PollConfig,
}

impl PollPolicy {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    /// Degraded when either threshold is strictly exceeded
    pub fn decide(&self, sample: &ResourceSample) -> PollDecision {
        let degraded = sample.cpu_percent > self.config.cpu_threshold
            || sample.memory_percent > self.config.memory_threshold;
        if degraded {
            PollDecision {
                sleep_seconds: self.config.degraded_sleep_secs,
                reason: PollReason::Degraded,
            }
        } else {
            PollDecision {
                sleep_seconds: self.config.nominal_sleep_secs,
                reason: PollReason::Nominal,
            }
        }
    }

    pub fn after_failure(&self) -> PollDecision {
        PollDecision {
            sleep_seconds: self.config.failure_sleep_secs,
            reason: PollReason::AfterFailure,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}

/// Summary of one successful cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub listed: usize,
    pub replied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub sample: ResourceSample,
    pub decision: PollDecision,
}

/// Owns the loop and everything it calls
pub struct PollScheduler {
    gateway: Arc<dyn MailboxGateway>,
    pipeline: MessagePipeline,
    sampler: Arc<dyn ResourceSampler>,
    sleeper: Arc<dyn Sleeper>,
    policy: PollPolicy,
}

impl PollScheduler {
    pub fn new(
        gateway: Arc<dyn MailboxGateway>,
        pipeline: MessagePipeline,
        sampler: Arc<dyn ResourceSampler>,
        sleeper: Arc<dyn Sleeper>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            pipeline,
            sampler,
            sleeper,
            policy,
        }
    }

    /// Poll, process, sample and decide, without sleeping
    ///
    /// # Errors
    ///
    /// Returns the cycle-level failure (listing the mailbox); per-message
    /// failures are counted in the report instead.
    pub async fn run_cycle(&self) -> AppResult<CycleReport> {
        let ids = self.gateway.list_unread().await?;
        if ids.is_empty() {
            info!("no new messages");
        } else {
            info!(count = ids.len(), "processing unread messages");
        }

        let (mut replied, mut skipped, mut failed) = (0, 0, 0);
        for id in &ids {
            match self.pipeline.process(id).await {
                MessageOutcome::Replied => replied += 1,
                MessageOutcome::Skipped(_) => skipped += 1,
                MessageOutcome::Failed(_) => failed += 1,
            }
        }

        let sample = self.sampler.sample().await;
        let decision = self.policy.decide(&sample);
        if decision.reason == PollReason::Degraded {
            warn!(
                cpu_percent = sample.cpu_percent,
                memory_percent = sample.memory_percent,
                "high resource usage detected; extending poll interval"
            );
        }
        Ok(CycleReport {
            listed: ids.len(),
            replied,
            skipped,
            failed,
            sample,
            decision,
        })
    }

    /// One full loop iteration: cycle, decide, sleep
    ///
    /// Never fails; a cycle error becomes the failure backoff.
    pub async fn tick(&self) -> PollDecision {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", id = %cycle_id);
        let decision = match self.run_cycle().instrument(span.clone()).await {
            Ok(report) => {
                info!(
                    parent: &span,
                    listed = report.listed,
                    replied = report.replied,
                    skipped = report.skipped,
                    failed = report.failed,
                    "cycle complete"
                );
                report.decision
            }
            Err(e) => {
                error!(parent: &span, kind = e.kind(), error = %e, "poll cycle failed");
                self.policy.after_failure()
            }
        };

        match next_poll_at(decision.sleep_seconds) {
            Some(next_poll) => info!(
                parent: &span,
                sleep_seconds = decision.sleep_seconds,
                reason = ?decision.reason,
                next_poll = %next_poll,
                "sleeping until next poll"
            ),
            None => info!(
                parent: &span,
                sleep_seconds = decision.sleep_seconds,
                reason = ?decision.reason,
                "sleeping until next poll"
            ),
        }
        self.sleeper.sleep(decision.duration()).await;
        decision
    }

    /// Loop until the process is stopped from outside
    pub async fn run_forever(&self) {
        loop {
            self.tick().await;
        }
    }
}

/// Wall-clock time of the next poll, `None` if it is not representable
fn next_poll_at(sleep_seconds: u64) -> Option<String> {
    let delta = i64::try_from(sleep_seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)?;
    Utc::now()
        .checked_add_signed(delta)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{PollDecision, PollPolicy, PollReason, PollScheduler, Sleeper, next_poll_at};
    use crate::config::PollConfig;
    use crate::orchestrator::tests::orchestrator;
    use crate::pipeline::MessagePipeline;
    use crate::pipeline::tests::FakeGateway;
    use crate::resources::{ResourceSample, ResourceSampler};

    struct FixedSampler(ResourceSample);

    #[async_trait]
    impl ResourceSampler for FixedSampler {
        async fn sample(&self) -> ResourceSample {
            self.0
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().expect("lock").push(duration);
        }
    }

    fn sample(cpu: f32, memory: f32) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            memory_percent: memory,
        }
    }

    fn scheduler(
        gateway: Arc<FakeGateway>,
        load: ResourceSample,
    ) -> (PollScheduler, Arc<RecordingSleeper>) {
        scheduler_with_policy(gateway, load, PollPolicy::default())
    }

    fn scheduler_with_policy(
        gateway: Arc<FakeGateway>,
        load: ResourceSample,
        policy: PollPolicy,
    ) -> (PollScheduler, Arc<RecordingSleeper>) {
        let (orchestrator, _log) = orchestrator(&[true, true, true, true], None);
        let pipeline = MessagePipeline::new(gateway.clone(), orchestrator);
        let sleeper = Arc::new(RecordingSleeper::default());
        let scheduler = PollScheduler::new(
            gateway,
            pipeline,
            Arc::new(FixedSampler(load)),
            sleeper.clone(),
            policy,
        );
        (scheduler, sleeper)
    }

    #[test]
    fn high_cpu_selects_degraded_interval() {
        let decision = PollPolicy::default().decide(&sample(75.0, 40.0));
        assert_eq!(
            decision,
            PollDecision {
                sleep_seconds: 1200,
                reason: PollReason::Degraded
            }
        );
    }

    #[test]
    fn high_memory_alone_selects_degraded_interval() {
        let decision = PollPolicy::default().decide(&sample(5.0, 70.5));
        assert_eq!(decision.sleep_seconds, 1200);
    }

    #[test]
    fn low_load_selects_nominal_interval() {
        let decision = PollPolicy::default().decide(&sample(10.0, 10.0));
        assert_eq!(decision.sleep_seconds, 300);
        assert_eq!(decision.reason, PollReason::Nominal);
    }

    #[test]
    fn thresholds_are_strict() {
        let policy = PollPolicy::default();
        assert_eq!(policy.decide(&sample(60.0, 10.0)).sleep_seconds, 300);
        assert_eq!(policy.decide(&sample(10.0, 70.0)).sleep_seconds, 300);
    }

    #[test]
    fn failure_backoff_is_nominal_length() {
        let decision = PollPolicy::default().after_failure();
        assert_eq!(decision.sleep_seconds, 300);
        assert_eq!(decision.reason, PollReason::AfterFailure);
    }

    #[tokio::test]
    async fn failed_fetch_does_not_stop_the_next_message() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_message(1, Some("first"), Some("a@example.com"))
                .with_message(2, Some("second"), Some("b@example.com")),
        );
        gateway.fail_fetch.lock().expect("lock").insert(1);
        let (scheduler, _sleeper) = scheduler(gateway.clone(), sample(10.0, 10.0));

        let report = scheduler.run_cycle().await.expect("cycle succeeds");

        assert_eq!(report.listed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.replied, 1);
        assert_eq!(gateway.marked(), vec![2]);
        let recipients: Vec<String> = gateway.sent().into_iter().map(|(to, _, _)| to).collect();
        assert_eq!(recipients, vec!["b@example.com".to_owned()]);
    }

    #[tokio::test]
    async fn messages_are_processed_in_listing_order() {
        let gateway = Arc::new(
            FakeGateway::default()
                .with_message(9, Some("x"), Some("first@example.com"))
                .with_message(4, Some("y"), Some("second@example.com")),
        );
        let (scheduler, _sleeper) = scheduler(gateway.clone(), sample(10.0, 10.0));
        scheduler.run_cycle().await.expect("cycle succeeds");
        assert_eq!(gateway.marked(), vec![9, 4]);
    }

    #[tokio::test]
    async fn empty_mailbox_is_a_normal_cycle() {
        let gateway = Arc::new(FakeGateway::default());
        let (scheduler, sleeper) = scheduler(gateway, sample(10.0, 10.0));

        let decision = scheduler.tick().await;

        assert_eq!(decision.reason, PollReason::Nominal);
        assert_eq!(
            *sleeper.slept.lock().expect("lock"),
            vec![Duration::from_secs(300)]
        );
    }

    #[tokio::test]
    async fn degraded_load_sleeps_longer_after_processing() {
        let gateway = Arc::new(FakeGateway::default().with_message(
            1,
            Some("q"),
            Some("a@example.com"),
        ));
        let (scheduler, sleeper) = scheduler(gateway.clone(), sample(75.0, 40.0));

        let decision = scheduler.tick().await;

        assert_eq!(decision.reason, PollReason::Degraded);
        assert_eq!(gateway.marked(), vec![1]);
        assert_eq!(
            *sleeper.slept.lock().expect("lock"),
            vec![Duration::from_secs(1200)]
        );
    }

    #[tokio::test]
    async fn listing_failure_backs_off_and_the_loop_keeps_going() {
        let gateway = Arc::new(FakeGateway::default().with_message(
            1,
            Some("q"),
            Some("a@example.com"),
        ));
        *gateway.fail_list.lock().expect("lock") = true;
        let (scheduler, sleeper) = scheduler(gateway.clone(), sample(90.0, 90.0));

        let first = scheduler.tick().await;
        assert_eq!(first.reason, PollReason::AfterFailure);
        assert!(gateway.sent().is_empty());

        *gateway.fail_list.lock().expect("lock") = false;
        let second = scheduler.tick().await;
        assert_eq!(second.reason, PollReason::Degraded);
        assert_eq!(gateway.marked(), vec![1]);

        assert_eq!(
            *sleeper.slept.lock().expect("lock"),
            vec![Duration::from_secs(300), Duration::from_secs(1200)]
        );
    }

    #[test]
    fn next_poll_time_is_none_when_unrepresentable() {
        assert!(next_poll_at(300).is_some());
        assert!(next_poll_at(10_000_000_000_000).is_none());
        assert!(next_poll_at(u64::MAX).is_none());
    }

    #[tokio::test]
    async fn huge_interval_still_sleeps_without_panicking() {
        let policy = PollPolicy::new(PollConfig {
            nominal_sleep_secs: 10_000_000_000_000,
            ..PollConfig::default()
        });
        let (scheduler, sleeper) =
            scheduler_with_policy(Arc::new(FakeGateway::default()), sample(10.0, 10.0), policy);

        let decision = scheduler.tick().await;

        assert_eq!(decision.sleep_seconds, 10_000_000_000_000);
        assert_eq!(
            *sleeper.slept.lock().expect("lock"),
            vec![Duration::from_secs(10_000_000_000_000)]
        );
    }
}
