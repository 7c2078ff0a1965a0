/*
[INPUT]:  Test scenarios needing a host and an event listener
[OUTPUT]: Shared test utilities and fixtures
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for breakhandler-adapter tests

use std::time::Duration;

use breakhandler_adapter::{HostEvent, SimulatedHost};
use tokio::sync::mpsc;

/// Simulated host with an attached event listener
pub fn attached_host(host: SimulatedHost) -> (SimulatedHost, mpsc::UnboundedReceiver<HostEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    host.attach(tx);
    (host, rx)
}

/// Receive the next host event or fail the test after a short wait
#[allow(dead_code)]
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for host event")
        .expect("host event channel closed")
}
