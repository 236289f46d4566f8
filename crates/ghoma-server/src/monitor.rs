//! Heartbeat monitor
//!
//! Sweeps the registry once per period and force-closes devices whose last
//! heartbeat is older than the configured timeout. Evictions go through
//! [`ServerState::evict_stale`], the same teardown a normal close uses.

use ghoma_core::time::{self, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::state::ServerState;

pub struct HeartbeatMonitor {
    state: Arc<ServerState>,
    period: Duration,
}

impl HeartbeatMonitor {
    /// Monitor sweeping once per heartbeat timeout
    pub fn new(state: Arc<ServerState>) -> Self {
        let period = state.config().heartbeat_timeout();
        Self::with_period(state, period)
    }

    pub fn with_period(state: Arc<ServerState>, period: Duration) -> Self {
        Self {
            state,
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run one sweep against the current wall clock
    pub async fn sweep(&self) -> usize {
        self.sweep_at(time::now()).await
    }

    /// Run one sweep as if it were `now`
    pub async fn sweep_at(&self, now: Timestamp) -> usize {
        debug!("CHECK {} devices", self.state.registry().len());
        let evicted = self.state.evict_stale(now).await;
        if evicted > 0 {
            info!("Evicted {} silent device(s)", evicted);
        }
        evicted
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep every period until the server shuts down
    pub async fn run(self) {
        let mut shutdown = self.state.shutdown_signal();
        if *shutdown.borrow() {
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Heartbeat monitor started, period {:?}", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => break,
            }
        }

        debug!("Heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::testing::record_at;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState::new(ServerConfig::default()))
    }

    #[test]
    fn test_period_defaults_to_timeout() {
        let monitor = HeartbeatMonitor::new(state());
        assert_eq!(monitor.period(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_stale_devices() {
        let state = state();
        let now: Timestamp = 50_000_000_000;
        let (fresh, fresh_sender) = record_at([0x01, 0, 0], now - 300_000_000);
        let (stale, stale_sender) = record_at([0x02, 0, 0], now - 300_000_001);
        state.register(fresh).await;
        state.register(stale).await;
        let mut events = state.events().subscribe();

        let monitor = HeartbeatMonitor::new(state.clone());
        assert_eq!(monitor.sweep_at(now).await, 1);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind(), "closed");
        assert_eq!(event.device().id, "020000");
        assert_eq!(stale_sender.close_count(), 1);
        assert_eq!(fresh_sender.close_count(), 0);
        assert!(state.registry().contains("010000"));

        // A second sweep at the same instant finds nothing
        assert_eq!(monitor.sweep_at(now).await, 0);
    }

    #[tokio::test]
    async fn test_run_evicts_and_stops_on_shutdown() {
        let state = state();
        let long_ago = time::now() - 3_600_000_000;
        let (stale, stale_sender) = record_at([0x0A, 0x0B, 0x0C], long_ago);
        state.register(stale).await;

        let handle = HeartbeatMonitor::with_period(state.clone(), Duration::from_millis(20)).spawn();

        let deadline = Instant::now() + Duration::from_secs(2);
        while state.registry().contains("0a0b0c") && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!state.registry().contains("0a0b0c"));
        assert_eq!(stale_sender.close_count(), 1);

        state.begin_shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
