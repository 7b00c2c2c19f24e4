//! Driver lifecycle and write pipeline.
//!
//! Flow:
//! 1. [`HttpClientBridge::spawn`] forks the worker and starts the driver task
//! 2. The kernel registry calls [`DriverIo::notify_start`]; the task emits
//!    the one-time born event and begins draining queued commands
//! 3. [`DriverIo::handle_command`] frames matching commands onto the
//!    worker's stdin, in submission order
//! 4. [`DriverIo::shutdown`] (or an unexpected worker exit) tears down the
//!    process and stream handles together
//!
//! All mutable driver state lives in one spawned task; the public handle
//! only moves messages over channels, so nothing here needs a lock.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::SinkExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot};
use tokio_util::bytes::Bytes;
use tokio_util::codec::FramedWrite;

use crate::codec::{Frame, FrameCodec};
use crate::event::{InstanceId, KernelEvent, Wire};
use crate::spawner::{ExecSpawner, SpawnError, WorkerSpawner};

/// Default worker executable, resolved through `PATH`.
pub const DEFAULT_WORKER_PATH: &str = "io-worker";

/// Configuration for a driver instance.
pub struct BridgeConfig {
    spawner: Arc<dyn WorkerSpawner>,
}

impl BridgeConfig {
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            spawner: Arc::new(ExecSpawner::new(worker_path)),
        }
    }

    /// Replace the spawn strategy (the test seam).
    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_PATH)
    }
}

/// Capability surface the kernel registry drives.
///
/// Every driver exposes the same three entry points: announce liveness,
/// accept a routed command, tear down.
pub trait DriverIo {
    /// Ask the driver to announce itself to the kernel. The registry calls
    /// this once after construction; repeats are ignored. Commands accepted
    /// before the announcement stay queued until it has been emitted.
    fn notify_start(&self);

    /// Offer a routed command. Returns `true` when the command was accepted
    /// (routing head matched and the frame was queued for writing), `false`
    /// otherwise — a mismatch is a no-op for the driver, not an error.
    fn handle_command(&self, wire: &Wire, payload: Bytes) -> bool;

    /// Tear the driver down: complete writes already submitted, close the
    /// worker's stdin, and wait for the worker to exit. Resolves once both
    /// handles have been released. Safe to invoke with writes in flight;
    /// calling again after completion returns immediately.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;
}

enum Control {
    Talk,
    Exit { ack: oneshot::Sender<()> },
}

/// The HTTP-client bridge: forwards kernel commands to a supervised worker
/// subprocess over a length-prefixed pipe protocol.
///
/// This is the handle the kernel holds. The process and pipe handles live in
/// the driver task and are closed together, never independently.
pub struct HttpClientBridge {
    instance: InstanceId,
    live: Arc<AtomicBool>,
    cmd_tx: mpsc::UnboundedSender<Frame>,
    ctrl_tx: mpsc::UnboundedSender<Control>,
}

impl HttpClientBridge {
    /// Spawn the worker and start the driver task.
    ///
    /// On success the driver is live and will emit exactly one
    /// [`KernelEvent::Born`] on `events` once [`DriverIo::notify_start`] is
    /// called. On failure everything allocated so far is released, no
    /// readiness event is ever sent, and the error propagates to the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: BridgeConfig,
        events: mpsc::UnboundedSender<KernelEvent>,
    ) -> Result<Self, SpawnError> {
        let instance = InstanceId::from_clock();

        let mut child = config.spawner.spawn()?;
        let Some(stdin) = child.stdin.take() else {
            // A spawner that didn't pipe stdin gives us no write path; the
            // process must not outlive the failed construction.
            let _ = child.start_kill();
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Err(SpawnError::StdinNotCaptured);
        };
        let sink = FramedWrite::new(stdin, FrameCodec::new());

        tracing::info!(instance = %instance, "worker spawned");

        let live = Arc::new(AtomicBool::new(true));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_driver(
            instance,
            child,
            sink,
            cmd_rx,
            ctrl_rx,
            events,
            Arc::clone(&live),
        ));

        Ok(Self {
            instance,
            live,
            cmd_tx,
            ctrl_tx,
        })
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// True from successful spawn until teardown or worker exit.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl DriverIo for HttpClientBridge {
    fn notify_start(&self) {
        let _ = self.ctrl_tx.send(Control::Talk);
    }

    fn handle_command(&self, wire: &Wire, payload: Bytes) -> bool {
        if !wire.is_for_driver() {
            return false;
        }
        let frame = Frame::http_client(payload);
        self.cmd_tx.send(frame).is_ok()
    }

    async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.ctrl_tx.send(Control::Exit { ack }).is_err() {
            // Driver task already gone: teardown has happened.
            return;
        }
        let _ = done.await;
    }
}

async fn run_driver(
    instance: InstanceId,
    mut child: Child,
    sink: FramedWrite<ChildStdin, FrameCodec>,
    mut cmd_rx: mpsc::UnboundedReceiver<Frame>,
    mut ctrl_rx: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<KernelEvent>,
    live: Arc<AtomicBool>,
) {
    let mut sink = Some(sink);
    let mut announced = false;

    loop {
        tokio::select! {
            biased;

            ctrl = ctrl_rx.recv() => match ctrl {
                Some(Control::Talk) => {
                    if announced {
                        tracing::debug!(instance = %instance, "duplicate start notification ignored");
                        continue;
                    }
                    announced = true;
                    let _ = events.send(KernelEvent::born(instance));
                    tracing::info!(instance = %instance, "driver live, born event emitted");
                }
                Some(Control::Exit { ack }) => {
                    if announced {
                        drain_pending(&mut sink, &mut cmd_rx, instance).await;
                    }
                    teardown(&mut sink, &mut child, &live, instance).await;
                    let _ = ack.send(());
                    return;
                }
                None => {
                    // Handle dropped without an explicit shutdown.
                    if announced {
                        drain_pending(&mut sink, &mut cmd_rx, instance).await;
                    }
                    teardown(&mut sink, &mut child, &live, instance).await;
                    return;
                }
            },

            status = child.wait() => {
                let code = status.as_ref().ok().and_then(|s| s.code());
                live.store(false, Ordering::SeqCst);
                // The pipe died with the process; release both together.
                sink.take();
                tracing::error!(instance = %instance, code = ?code, "worker exited unexpectedly, escalating fault");
                let _ = events.send(KernelEvent::fault(instance, code));
                return;
            }

            cmd = cmd_rx.recv(), if announced => match cmd {
                Some(frame) => submit(&mut sink, instance, frame).await,
                None => {
                    teardown(&mut sink, &mut child, &live, instance).await;
                    return;
                }
            },
        }
    }
}

/// Write one frame to the worker. The frame is consumed either way; a failed
/// submission is local — logged, buffer released, driver stays live.
async fn submit(
    sink: &mut Option<FramedWrite<ChildStdin, FrameCodec>>,
    instance: InstanceId,
    frame: Frame,
) {
    let Some(writer) = sink.as_mut() else {
        tracing::warn!(instance = %instance, "frame dropped, input stream already closed");
        return;
    };

    let bytes = frame.wire_size();
    match writer.send(frame).await {
        Ok(()) => tracing::debug!(instance = %instance, bytes, "frame written"),
        Err(error) => {
            tracing::warn!(instance = %instance, %error, "frame write failed, driver stays live");
        }
    }
}

/// Complete writes that were submitted before teardown was requested.
async fn drain_pending(
    sink: &mut Option<FramedWrite<ChildStdin, FrameCodec>>,
    cmd_rx: &mut mpsc::UnboundedReceiver<Frame>,
    instance: InstanceId,
) {
    while let Ok(frame) = cmd_rx.try_recv() {
        submit(sink, instance, frame).await;
    }
}

/// Release the stream and process handles together. Closing stdin signals
/// the worker to exit; it is expected to do so on EOF.
async fn teardown(
    sink: &mut Option<FramedWrite<ChildStdin, FrameCodec>>,
    child: &mut Child,
    live: &AtomicBool,
    instance: InstanceId,
) {
    live.store(false, Ordering::SeqCst);

    if let Some(mut writer) = sink.take()
        && let Err(error) = writer.close().await
    {
        tracing::warn!(instance = %instance, %error, "failed to close worker stdin");
    }

    match child.wait().await {
        Ok(status) => tracing::info!(instance = %instance, %status, "worker exited"),
        Err(error) => tracing::warn!(instance = %instance, %error, "failed to reap worker"),
    }
}

#[cfg(test)]
mod tests {
    use std::process::Stdio;

    use tokio::process::Command;

    use super::*;

    /// Misbehaving spawner: comes up without a piped stdin.
    struct NullStdinSpawner;

    impl WorkerSpawner for NullStdinSpawner {
        fn spawn(&self) -> Result<Child, SpawnError> {
            let child = Command::new("/bin/sleep")
                .arg("5")
                .stdin(Stdio::null())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()?;
            Ok(child)
        }
    }

    #[tokio::test]
    async fn uncaptured_stdin_fails_construction_and_emits_nothing() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let config = BridgeConfig::default().with_spawner(Arc::new(NullStdinSpawner));

        let result = HttpClientBridge::spawn(config, events_tx);

        assert!(matches!(result, Err(SpawnError::StdinNotCaptured)));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn spawn_failure_propagates_and_emits_nothing() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let config = BridgeConfig::new("/nonexistent/iobridge-test-worker");

        let result = HttpClientBridge::spawn(config, events_tx);

        assert!(matches!(result, Err(SpawnError::Spawn(_))));
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn routing_mismatch_is_rejected_at_the_boundary() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config =
            BridgeConfig::default().with_spawner(Arc::new(ExecSpawner::new("/bin/cat")));
        let bridge = HttpClientBridge::spawn(config, events_tx).unwrap();

        let wrong = Wire::new(["behn", "timer"]);
        assert!(!bridge.handle_command(&wrong, Bytes::from_static(b"tick")));
        assert!(bridge.is_live());

        bridge.shutdown().await;
        assert!(!bridge.is_live());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config =
            BridgeConfig::default().with_spawner(Arc::new(ExecSpawner::new("/bin/cat")));
        let bridge = HttpClientBridge::spawn(config, events_tx).unwrap();

        bridge.shutdown().await;
        bridge.shutdown().await;
        assert!(!bridge.is_live());
    }
}
