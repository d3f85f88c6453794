//! Node-local stale-mount detection and recovery for NVMe/TCP block volumes.
//!
//! A recovery request names a mount path and the NVMe Qualified Name of the
//! subsystem that should back it. [`recover::MountRecoverer`] drives
//! unmount -> resolve -> mount against that path, retrying transient
//! failures with exponential backoff and refusing outright to force an
//! in-use mount. [`stale::StaleMountChecker`] answers whether a mount has
//! already drifted from the device its NQN currently resolves to, which
//! happens routinely when an NVMe/TCP transport reconnects and the kernel
//! assigns a new controller index.
//!
//! The crate installs no logger and reads no configuration file of its own;
//! callers wire in a [`mounter::Mounter`], a [`device::DeviceResolver`], and
//! optionally a [`metrics::MetricsSink`].

pub mod cancel;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod fs;
pub mod logging;
pub mod metrics;
pub mod mount_option;
pub mod mounter;
pub mod mountinfo;
pub mod recover;
pub mod stale;

pub use cancel::{CancellationToken, Canceller};
pub use config::{RecoveryConfig, RecoveryResult};
pub use device::{DeviceResolver, SysfsDeviceResolver};
pub use error::{AgentError, ErrorKind};
pub use metrics::{MetricsSink, NoopMetricsSink};
pub use mounter::{Mounter, RealMounter};
pub use recover::MountRecoverer;
pub use stale::{StaleInfo, StaleMountChecker, StaleReason};
