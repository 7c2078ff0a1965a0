/*
[INPUT]:  Test scenarios needing a running break service
[OUTPUT]: Harness wiring SimulatedHost, ManualClock and BreakService together
[POS]:    Test infrastructure - shared across integration tests
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for breakhandler-scheduler tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use breakhandler_adapter::SimulatedHost;
use breakhandler_scheduler::{
    BreakHandle, BreakService, ConfigStore, CredentialBlob, ManualClock, MemoryConfig,
    ServiceRunner, SessionSelector,
};
use tokio::sync::mpsc;

/// Per-task config for a task named "Miner" breaking after exactly one minute
pub const MINER_LOGOUT: &[(&str, &str)] = &[
    ("miner-thresholdfrom", "1"),
    ("miner-thresholdto", "1"),
    ("miner-breakfrom", "1"),
    ("miner-breakto", "1"),
    ("miner-logout", "true"),
];

pub const MINER_IDLE: &[(&str, &str)] = &[
    ("miner-thresholdfrom", "1"),
    ("miner-thresholdto", "1"),
    ("miner-breakfrom", "1"),
    ("miner-breakto", "1"),
    ("miner-logout", "false"),
];

pub const MANUAL_ACCOUNT: &[(&str, &str)] = &[
    ("accountselection", "true"),
    ("accountselection-manual-username", "me"),
    ("accountselection-manual-password", "secret"),
];

pub struct Harness {
    pub host: SimulatedHost,
    pub clock: Arc<ManualClock>,
    pub config: Arc<MemoryConfig>,
    pub handle: BreakHandle,
    pub runner: ServiceRunner,
}

impl Harness {
    pub fn start(host: SimulatedHost, pairs: &[&[(&str, &str)]]) -> Self {
        Self::start_with_blob(host, pairs, None)
    }

    pub fn start_with_blob(
        host: SimulatedHost,
        pairs: &[&[(&str, &str)]],
        blob: Option<&str>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        host.attach(tx);

        let config = Arc::new(MemoryConfig::from_pairs(
            pairs.iter().flat_map(|group| group.iter().copied()),
        ));
        let store: Arc<dyn ConfigStore> = config.clone();
        let selector = SessionSelector::new(store.clone(), blob.map(CredentialBlob::new));
        let clock = Arc::new(ManualClock::default());

        let (handle, runner) = BreakService::new(Arc::new(host.clone()), store, selector)
            .with_clock(clock.clone())
            .spawn(rx);

        Self {
            host,
            clock,
            config,
            handle,
            runner,
        }
    }

    /// Advance the host one game tick and let the service react
    pub async fn tick(&self) {
        self.host.advance_tick();
        settle().await;
    }

    pub async fn ticks(&self, count: usize) {
        for _ in 0..count {
            self.tick().await;
        }
    }

    /// Move the wall clock and wait for the next heartbeat to observe it
    pub async fn elapse(&self, by: chrono::Duration) {
        self.clock.advance(by);
        tokio::time::sleep(Duration::from_millis(1_100)).await;
    }

    pub async fn shutdown(mut self) {
        self.runner
            .shutdown_and_wait()
            .await
            .expect("service shuts down cleanly");
    }
}

/// Let every spawned task run until the runtime is idle.
///
/// Under a paused clock the sleep only completes once nothing else is ready.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
