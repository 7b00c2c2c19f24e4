//! Kernel-facing routing and events.
//!
//! Inbound commands arrive addressed by a [`Wire`] — a routing path whose
//! head segment decides which driver handles them. Outbound, the driver emits
//! [`KernelEvent`]s: one readiness notification when it comes up, and a fault
//! if the worker dies underneath it. The exact encoding of events is owned by
//! the kernel; these are the in-process shapes it consumes.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Routing-path head for commands addressed to this driver.
pub const DRIVER_WIRE_TAG: &str = "http-client";

/// A routing path: the addressing prefix the kernel uses to pick a driver.
///
/// Only the head segment means anything to this driver; the rest of the path
/// is opaque and passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Wire(Vec<String>);

impl Wire {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Whether this path addresses the HTTP-client driver.
    pub fn is_for_driver(&self) -> bool {
        self.head() == Some(DRIVER_WIRE_TAG)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Identifier tagging this driver incarnation, derived from the construction
/// time. Distinguishes restarts on the readiness wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Fingerprint the current wall clock into a 32-bit identifier.
    pub fn from_clock() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let mut hasher = DefaultHasher::new();
        now.as_nanos().hash(&mut hasher);
        Self(hasher.finish() as u32)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Notifications the driver sends back to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelEvent {
    /// One-time readiness notification: the worker is confirmed running.
    /// Carries no payload beyond the addressing wire.
    Born { wire: Wire },

    /// The worker exited without the driver asking it to. `status` is the
    /// exit code when the platform reports one.
    Fault { wire: Wire, status: Option<i32> },
}

impl KernelEvent {
    pub fn born(instance: InstanceId) -> Self {
        Self::Born {
            wire: driver_wire(instance),
        }
    }

    pub fn fault(instance: InstanceId, status: Option<i32>) -> Self {
        Self::Fault {
            wire: driver_wire(instance),
            status,
        }
    }

    pub fn wire(&self) -> &Wire {
        match self {
            Self::Born { wire } => wire,
            Self::Fault { wire, .. } => wire,
        }
    }
}

fn driver_wire(instance: InstanceId) -> Wire {
    Wire::new([DRIVER_WIRE_TAG.to_string(), instance.to_string()])
}
