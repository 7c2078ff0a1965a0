/*
[INPUT]:  Click and keystroke requests from the tick/heartbeat dispatch context
[OUTPUT]: Ordered synthetic input events delivered to the Host by one background worker
[POS]:    Input layer - single-worker queue that keeps input synthesis off the tick path
[UPDATE]: When adding new input gestures or changing shutdown/drain semantics
*/

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{HostError, Result};
use crate::host::Host;
use crate::types::{InputEvent, Key, KeyEventKind, MouseEventKind, Point};

const CLICK_SEQUENCE: [MouseEventKind; 6] = [
    MouseEventKind::Entered,
    MouseEventKind::Exited,
    MouseEventKind::Moved,
    MouseEventKind::Pressed,
    MouseEventKind::Released,
    MouseEventKind::Clicked,
];

/// One gesture queued for the input worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputJob {
    Click(Point),
    Key(Key),
}

impl InputJob {
    /// Expand the gesture into the host events that compose it, in delivery order
    pub fn events(&self) -> Vec<InputEvent> {
        match *self {
            InputJob::Click(point) => CLICK_SEQUENCE
                .iter()
                .map(|kind| InputEvent::mouse(*kind, point))
                .collect(),
            InputJob::Key(key) => vec![
                InputEvent::key(KeyEventKind::Pressed, key),
                InputEvent::key(KeyEventKind::Released, key),
            ],
        }
    }
}

/// Single-worker background queue for synthetic input.
///
/// Jobs are delivered strictly in submission order, and the events of one job
/// are never interleaved with another job's events.
#[derive(Debug)]
pub struct InputDispatcher {
    job_tx: mpsc::UnboundedSender<InputJob>,
    shutdown: CancellationToken,
    worker_handle: Option<JoinHandle<()>>,
}

impl InputDispatcher {
    /// Start a worker that delivers jobs to `host`.
    pub fn spawn(host: Arc<dyn Host>) -> Self {
        let (mut dispatcher, job_rx) = Self::detached();
        let shutdown = dispatcher.shutdown.clone();
        dispatcher.worker_handle = Some(tokio::spawn(async move {
            InputWorker::new(host, job_rx, shutdown).run().await;
        }));
        dispatcher
    }

    /// A dispatcher without a worker; the caller owns the receiving end.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<InputJob>) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        (
            Self {
                job_tx,
                shutdown: CancellationToken::new(),
                worker_handle: None,
            },
            job_rx,
        )
    }

    pub fn submit(&self, job: InputJob) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(HostError::QueueClosed);
        }
        self.job_tx.send(job).map_err(|_| HostError::QueueClosed)
    }

    pub fn click(&self, point: Point) -> Result<()> {
        self.submit(InputJob::Click(point))
    }

    pub fn send_key(&self, key: Key) -> Result<()> {
        self.submit(InputJob::Key(key))
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop accepting jobs, deliver everything already queued, and wait for
    /// the worker to exit.
    pub async fn shutdown_and_wait(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.worker_handle.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "input worker did not exit cleanly");
            }
        }
    }
}

impl Drop for InputDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct InputWorker {
    host: Arc<dyn Host>,
    job_rx: mpsc::UnboundedReceiver<InputJob>,
    shutdown: CancellationToken,
}

impl InputWorker {
    fn new(
        host: Arc<dyn Host>,
        job_rx: mpsc::UnboundedReceiver<InputJob>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            host,
            job_rx,
            shutdown,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                job = self.job_rx.recv() => {
                    match job {
                        Some(job) => self.deliver(job),
                        None => break,
                    }
                }
                _ = self.shutdown.cancelled() => {
                    self.drain();
                    break;
                }
            }
        }
        debug!("input worker stopped");
    }

    fn drain(&mut self) {
        self.job_rx.close();
        let mut drained = 0usize;
        while let Ok(job) = self.job_rx.try_recv() {
            self.deliver(job);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "delivered queued input before shutdown");
        }
    }

    fn deliver(&self, job: InputJob) {
        for event in job.events() {
            if let Err(err) = self.host.dispatch_input(event) {
                // Remaining events of a half-delivered gesture are meaningless.
                warn!(?job, error = %err, "host rejected synthetic input");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_expands_to_full_mouse_sequence() {
        let kinds: Vec<MouseEventKind> = InputJob::Click(Point::ORIGIN)
            .events()
            .into_iter()
            .filter_map(|event| match event {
                InputEvent::Mouse { kind, .. } => Some(kind),
                InputEvent::Key { .. } => None,
            })
            .collect();

        assert_eq!(kinds, CLICK_SEQUENCE.to_vec());
    }

    #[test]
    fn key_expands_to_press_then_release() {
        let events = InputJob::Key(Key::Escape).events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            InputEvent::Key { kind: KeyEventKind::Pressed, key: Key::Escape, .. }
        ));
        assert!(matches!(
            events[1],
            InputEvent::Key { kind: KeyEventKind::Released, key: Key::Escape, .. }
        ));
    }

    #[test]
    fn detached_dispatcher_queues_jobs_in_order() {
        let (dispatcher, mut rx) = InputDispatcher::detached();
        dispatcher.send_key(Key::Escape).unwrap();
        dispatcher.click(Point::new(3, 4)).unwrap();

        assert_eq!(rx.try_recv().unwrap(), InputJob::Key(Key::Escape));
        assert_eq!(rx.try_recv().unwrap(), InputJob::Click(Point::new(3, 4)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let (mut dispatcher, _rx) = InputDispatcher::detached();
        dispatcher.shutdown_and_wait().await;

        assert!(dispatcher.is_closed());
        assert_eq!(dispatcher.send_key(Key::Enter), Err(HostError::QueueClosed));
    }
}
