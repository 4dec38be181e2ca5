//! Background eviction of expired entries
//!
//! Every store also expires entries lazily on read; the sweep bounds memory
//! held by attempts and codes nobody comes back for.

use std::sync::Arc;
use std::time::Duration;

use device_link::CodeExchange;
use session_auth::LoginFlow;
use tracing::debug;

use crate::metrics;

/// Entries evicted by one sweep cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub login_attempts: usize,
    pub device_codes: usize,
    pub device_exchanges: usize,
}

/// Spawn the periodic sweep. Runs every `interval` until the runtime stops.
pub fn spawn_sweep_task(
    logins: Vec<Arc<LoginFlow>>,
    devices: Arc<CodeExchange>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; stores are empty at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            sweep_cycle(&logins, &devices).await;
        }
    })
}

/// Run one sweep over every login tracker and the code exchange.
pub async fn sweep_cycle(logins: &[Arc<LoginFlow>], devices: &CodeExchange) -> SweepReport {
    let mut report = SweepReport::default();
    for flow in logins {
        report.login_attempts += flow.tracker().sweep_expired().await;
    }
    let (codes, exchanges) = devices.sweep_expired().await;
    report.device_codes = codes;
    report.device_exchanges = exchanges;

    metrics::record_evictions("auth_state", report.login_attempts);
    metrics::record_evictions("device_codes", report.device_codes);
    metrics::record_evictions("device_exchanges", report.device_exchanges);

    if report != SweepReport::default() {
        debug!(
            login_attempts = report.login_attempts,
            device_codes = report.device_codes,
            device_exchanges = report.device_exchanges,
            "swept expired entries"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestApp;

    #[tokio::test]
    async fn sweep_cycle_evicts_only_expired_entries() {
        let app = TestApp::new().await;
        let state = &app.state;
        let github = state.logins["github"].clone();

        github.begin().await;
        state.devices.request_code("device-token").await.unwrap();

        // Code (60 s) has expired, login attempt (300 s) and exchange (300 s) have not
        app.clock.advance(Duration::from_secs(61));
        let logins = vec![github.clone()];
        let report = sweep_cycle(&logins, &state.devices).await;
        assert_eq!(
            report,
            SweepReport {
                login_attempts: 0,
                device_codes: 1,
                device_exchanges: 0,
            }
        );

        app.clock.advance(Duration::from_secs(240));
        let report = sweep_cycle(&logins, &state.devices).await;
        assert_eq!(report.login_attempts, 1);
        assert_eq!(report.device_exchanges, 1);
        assert!(github.tracker().is_empty().await);
        assert_eq!(state.devices.live_exchanges().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_sweeps_on_interval() {
        let app = TestApp::new().await;
        let state = &app.state;
        state.devices.request_code("device-token").await.unwrap();
        app.clock.advance(Duration::from_secs(600));

        let handle = spawn_sweep_task(
            state.logins.values().cloned().collect(),
            state.devices.clone(),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(state.devices.live_codes().await, 0);
        assert_eq!(state.devices.live_exchanges().await, 0);
        handle.abort();
    }
}
