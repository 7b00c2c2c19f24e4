//! iobridge: process-boundary I/O driver for an event-sourced kernel.
//!
//! The kernel emits opaque serialized commands; this crate frames them into
//! a length-prefixed binary protocol and forwards them over a pipe to a
//! worker subprocess it supervises. Today there is one worker kind, the
//! HTTP-client worker; the frame layout admits more without change.
//!
//! # Architecture
//!
//! - **codec**: wire frames (length + type tag + payload) and their codec
//! - **event**: routing paths and the events the driver sends the kernel
//! - **spawner**: worker process supervision with a fixed stdio topology
//! - **driver**: the lifecycle state machine and the write pipeline

pub mod codec;
pub mod driver;
pub mod event;
pub mod spawner;

pub use codec::{Frame, FrameCodec, FrameError, RequestTag};
pub use driver::{BridgeConfig, DEFAULT_WORKER_PATH, DriverIo, HttpClientBridge};
pub use event::{DRIVER_WIRE_TAG, InstanceId, KernelEvent, Wire};
pub use spawner::{ExecSpawner, SpawnError, WorkerSpawner};
