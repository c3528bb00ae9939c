//! Sequential observer scheduler (C10): drives every enabled observer once
//! per loop iteration, with a per-observer timeout and one cancellation
//! token shared by the whole agent.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::observer::{AgentContext, Observer, ObserverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Sleeping,
    ShuttingDown,
    Stopped,
}

pub struct Scheduler {
    observers: Vec<Box<dyn Observer>>,
    unhealthy: Mutex<HashSet<&'static str>>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(observers: Vec<Box<dyn Observer>>) -> Self {
        Self {
            observers,
            unhealthy: Mutex::new(HashSet::new()),
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().expect("scheduler state lock poisoned")
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().expect("scheduler state lock poisoned") = state;
    }

    fn is_unhealthy(&self, name: &'static str) -> bool {
        self.unhealthy.lock().expect("scheduler unhealthy set lock poisoned").contains(name)
    }

    fn mark_unhealthy(&self, name: &'static str) {
        self.unhealthy.lock().expect("scheduler unhealthy set lock poisoned").insert(name);
    }

    /// Runs every enabled, still-healthy observer once, in registration order.
    /// An observer that times out is marked permanently unhealthy and skipped
    /// on every subsequent call; a `Fatal` error or cancellation stops the
    /// pass immediately and propagates.
    pub async fn run_once(&self, ctx: &AgentContext) -> Result<(), ObserverError> {
        self.set_state(SchedulerState::Running);
        let timeout = Duration::from_secs(ctx.config.observer_manager.observer_execution_timeout_seconds.max(1));

        for observer in &self.observers {
            if ctx.is_cancelled() {
                self.set_state(SchedulerState::ShuttingDown);
                return Err(ObserverError::Cancelled);
            }
            if !observer.enabled(ctx) || self.is_unhealthy(observer.name()) {
                continue;
            }

            match tokio::time::timeout(timeout, observer.observe(ctx)).await {
                Ok(Ok(())) => {}
                Ok(Err(ObserverError::Fatal(msg))) => {
                    self.set_state(SchedulerState::ShuttingDown);
                    return Err(ObserverError::Fatal(msg));
                }
                Ok(Err(ObserverError::Cancelled)) => {
                    self.set_state(SchedulerState::ShuttingDown);
                    return Err(ObserverError::Cancelled);
                }
                Ok(Err(e)) => {
                    log::warn!(target: "scheduler", "{} reported a non-fatal error: {e}", observer.name());
                }
                Err(_elapsed) => {
                    log::error!(
                        target: "scheduler",
                        "{} exceeded its execution timeout of {}s, marking unhealthy",
                        observer.name(),
                        timeout.as_secs()
                    );
                    self.mark_unhealthy(observer.name());
                }
            }
        }
        self.set_state(SchedulerState::Idle);
        Ok(())
    }

    /// Runs `run_once` repeatedly, sleeping between passes, until the agent's
    /// cancellation token fires or an observer raises a fatal error.
    pub async fn run_forever(&self, ctx: &AgentContext) -> Result<(), ObserverError> {
        loop {
            if ctx.is_cancelled() {
                self.set_state(SchedulerState::Stopped);
                return Ok(());
            }
            self.run_once(ctx).await?;

            self.set_state(SchedulerState::Sleeping);
            let sleep_for = Duration::from_secs(ctx.config.observer_manager.observer_loop_sleep_seconds);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = ctx.cancellation.cancelled() => {
                    self.set_state(SchedulerState::Stopped);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::dump::NoopDumpWriter;
    use crate::health::InMemoryHealthReporter;
    use crate::probes::{FakeClusterQueryClient, FakeOsProbe};
    use crate::telemetry::RecordingTelemetrySink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_context(cfg: AgentConfig) -> AgentContext {
        AgentContext {
            node_name: "node-1".to_string(),
            config: Arc::new(cfg),
            cluster_query: Arc::new(FakeClusterQueryClient::new()),
            os_probe: Arc::new(FakeOsProbe::new()),
            health_reporter: Arc::new(InMemoryHealthReporter::new()),
            telemetry: Arc::new(RecordingTelemetrySink::new()),
            dump_writer: Arc::new(NoopDumpWriter::new()),
            csv_sink: None,
            log_file_sink: None,
            cancellation: CancellationToken::new(),
        }
    }

    struct CountingObserver {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Observer for CountingObserver {
        fn name(&self) -> &'static str {
            "CountingObserver"
        }
        fn enabled(&self, _ctx: &AgentContext) -> bool {
            true
        }
        fn run_interval(&self, _ctx: &AgentContext) -> Duration {
            Duration::from_secs(0)
        }
        async fn observe(&self, _ctx: &AgentContext) -> Result<(), ObserverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StallingObserver;

    #[async_trait]
    impl Observer for StallingObserver {
        fn name(&self) -> &'static str {
            "StallingObserver"
        }
        fn enabled(&self, _ctx: &AgentContext) -> bool {
            true
        }
        fn run_interval(&self, _ctx: &AgentContext) -> Duration {
            Duration::from_secs(0)
        }
        async fn observe(&self, _ctx: &AgentContext) -> Result<(), ObserverError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct FatalObserver;

    #[async_trait]
    impl Observer for FatalObserver {
        fn name(&self) -> &'static str {
            "FatalObserver"
        }
        fn enabled(&self, _ctx: &AgentContext) -> bool {
            true
        }
        fn run_interval(&self, _ctx: &AgentContext) -> Duration {
            Duration::from_secs(0)
        }
        async fn observe(&self, _ctx: &AgentContext) -> Result<(), ObserverError> {
            Err(ObserverError::Fatal("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn run_once_invokes_every_enabled_observer() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(vec![Box::new(CountingObserver { calls: calls.clone() })]);
        let ctx = test_context(AgentConfig::default());
        scheduler.run_once(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn timed_out_observer_is_marked_unhealthy_and_skipped_next_pass() {
        let mut cfg = AgentConfig::default();
        cfg.observer_manager.observer_execution_timeout_seconds = 1;
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(vec![
            Box::new(StallingObserver),
            Box::new(CountingObserver { calls: calls.clone() }),
        ]);
        let ctx = test_context(cfg);
        scheduler.run_once(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_unhealthy("StallingObserver"));

        scheduler.run_once(&ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_error_propagates_and_stops_the_pass() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(vec![
            Box::new(FatalObserver),
            Box::new(CountingObserver { calls: calls.clone() }),
        ]);
        let ctx = test_context(AgentConfig::default());
        let result = scheduler.run_once(&ctx).await;
        assert!(matches!(result, Err(ObserverError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_before_a_pass_returns_cancelled() {
        let ctx = test_context(AgentConfig::default());
        ctx.cancellation.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(vec![Box::new(CountingObserver { calls: calls.clone() })]);
        let result = scheduler.run_once(&ctx).await;
        assert!(matches!(result, Err(ObserverError::Cancelled)));
    }
}
