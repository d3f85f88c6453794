use std::fs::canonicalize;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;

use crate::device::DeviceResolver;
use crate::error::AgentError;
use crate::mountinfo::{self, MountRecord};

/// Why a mount was (or was not) judged stale.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StaleReason {
    NotStale,
    MountNotFound,
    DeviceDisappeared,
    DeviceMismatch,
}

/// The full diagnostic picture behind a staleness decision.
#[derive(Clone, Debug, PartialEq)]
pub struct StaleInfo {
    pub is_stale: bool,
    pub reason: StaleReason,
    pub mounted_device: Option<String>,
    pub mounted_device_canonical: Option<PathBuf>,
    pub current_device: Option<String>,
    pub current_device_canonical: Option<PathBuf>,
}

/// Looks up the device backing a mount point, by default via
/// `/proc/self/mountinfo`.
pub type MountLookup = dyn Fn(&str) -> Option<MountRecord> + Send + Sync;

pub fn default_mount_lookup(target: &str) -> Option<MountRecord> {
    let contents = std::fs::read_to_string("/proc/self/mountinfo").ok()?;
    let records: Vec<MountRecord> = mountinfo::parse_stream(&contents)
        .into_iter()
        .filter_map(Result::ok)
        .collect();
    mountinfo::find_mount(&records, target).cloned()
}

/// Decides whether a mount's backing device has drifted from what the
/// kernel currently resolves for its NVMe subsystem identity.
pub struct StaleMountChecker<'a> {
    resolver: &'a dyn DeviceResolver,
    lookup: Box<MountLookup>,
}

impl<'a> StaleMountChecker<'a> {
    pub fn new(resolver: &'a dyn DeviceResolver) -> Self {
        Self {
            resolver,
            lookup: Box::new(default_mount_lookup),
        }
    }

    pub fn with_lookup(resolver: &'a dyn DeviceResolver, lookup: Box<MountLookup>) -> Self {
        Self { resolver, lookup }
    }

    pub fn is_mount_stale(
        &self,
        mount_path: &str,
        nqn: &str,
    ) -> Result<(bool, StaleReason), AgentError> {
        let info = self.get_stale_info(mount_path, nqn)?;
        Ok((info.is_stale, info.reason))
    }

    pub fn get_stale_info(&self, mount_path: &str, nqn: &str) -> Result<StaleInfo, AgentError> {
        let record = match (self.lookup)(mount_path) {
            Some(r) => r,
            None => {
                return Ok(StaleInfo {
                    is_stale: true,
                    reason: StaleReason::MountNotFound,
                    mounted_device: None,
                    mounted_device_canonical: None,
                    current_device: None,
                    current_device_canonical: None,
                })
            }
        };

        let mounted_canonical = match canonicalize(&record.source) {
            Ok(p) => p,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Ok(StaleInfo {
                    is_stale: true,
                    reason: StaleReason::DeviceDisappeared,
                    mounted_device: Some(record.source.clone()),
                    mounted_device_canonical: None,
                    current_device: None,
                    current_device_canonical: None,
                })
            }
            Err(e) => {
                return Err(AgentError::ResolveFailed {
                    nqn: nqn.to_string(),
                    source: anyhow::anyhow!(
                        "unable to canonicalize mounted device {}: {}",
                        record.source,
                        e
                    ),
                })
            }
        };

        let current_device = self.resolver.resolve(nqn)?;
        let current_device_str = current_device.display().to_string();
        let current_canonical = canonicalize(&current_device).map_err(|e| {
            AgentError::ResolveFailed {
                nqn: nqn.to_string(),
                source: anyhow::anyhow!(
                    "unable to canonicalize current device {}: {}",
                    current_device_str,
                    e
                ),
            }
        })?;

        if mounted_canonical == current_canonical {
            Ok(StaleInfo {
                is_stale: false,
                reason: StaleReason::NotStale,
                mounted_device: Some(record.source),
                mounted_device_canonical: Some(mounted_canonical),
                current_device: Some(current_device_str),
                current_device_canonical: Some(current_canonical),
            })
        } else {
            Ok(StaleInfo {
                is_stale: true,
                reason: StaleReason::DeviceMismatch,
                mounted_device: Some(record.source),
                mounted_device_canonical: Some(mounted_canonical),
                current_device: Some(current_device_str),
                current_device_canonical: Some(current_canonical),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;

    struct FakeResolver {
        result: Mutex<Option<PathBuf>>,
    }

    impl DeviceResolver for FakeResolver {
        fn resolve(&self, _nqn: &str) -> Result<PathBuf, AgentError> {
            self.result
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| AgentError::ResolveFailed {
                    nqn: _nqn.to_string(),
                    source: anyhow::anyhow!("not found"),
                })
        }
    }

    #[test]
    fn mount_not_found_is_stale() {
        let resolver = FakeResolver {
            result: Mutex::new(None),
        };
        let checker =
            StaleMountChecker::with_lookup(&resolver, Box::new(|_: &str| -> Option<MountRecord> { None }));
        let (is_stale, reason) = checker.is_mount_stale("/mnt/x", "nqn.a").unwrap();
        assert!(is_stale);
        assert_eq!(reason, StaleReason::MountNotFound);
    }

    #[test]
    fn device_disappeared_is_stale() {
        let resolver = FakeResolver {
            result: Mutex::new(Some(PathBuf::from("/dev/null"))),
        };
        let checker = StaleMountChecker::with_lookup(
            &resolver,
            Box::new(|_: &str| {
                Some(MountRecord {
                    source: "/dev/nonexistent-xyz".into(),
                    target: "/mnt/x".into(),
                    fs_type: "ext4".into(),
                    options_csv: "rw".into(),
                })
            }),
        );
        let (is_stale, reason) = checker.is_mount_stale("/mnt/x", "nqn.a").unwrap();
        assert!(is_stale);
        assert_eq!(reason, StaleReason::DeviceDisappeared);
    }

    #[test]
    fn matching_devices_are_not_stale() {
        let resolver = FakeResolver {
            result: Mutex::new(Some(PathBuf::from("/dev/null"))),
        };
        let checker = StaleMountChecker::with_lookup(
            &resolver,
            Box::new(|_: &str| {
                Some(MountRecord {
                    source: "/dev/null".into(),
                    target: "/mnt/x".into(),
                    fs_type: "ext4".into(),
                    options_csv: "rw".into(),
                })
            }),
        );
        let (is_stale, reason) = checker.is_mount_stale("/mnt/x", "nqn.a").unwrap();
        assert!(!is_stale);
        assert_eq!(reason, StaleReason::NotStale);
    }

    #[test]
    fn mismatched_devices_are_stale() {
        let resolver = FakeResolver {
            result: Mutex::new(Some(PathBuf::from("/dev/zero"))),
        };
        let checker = StaleMountChecker::with_lookup(
            &resolver,
            Box::new(|_: &str| {
                Some(MountRecord {
                    source: "/dev/null".into(),
                    target: "/mnt/x".into(),
                    fs_type: "ext4".into(),
                    options_csv: "rw".into(),
                })
            }),
        );
        let (is_stale, reason) = checker.is_mount_stale("/mnt/x", "nqn.a").unwrap();
        assert!(is_stale);
        assert_eq!(reason, StaleReason::DeviceMismatch);
    }

    #[test]
    fn resolver_failure_is_not_reported_as_stale() {
        let resolver = FakeResolver {
            result: Mutex::new(None),
        };
        let checker = StaleMountChecker::with_lookup(
            &resolver,
            Box::new(|_: &str| {
                Some(MountRecord {
                    source: "/dev/null".into(),
                    target: "/mnt/x".into(),
                    fs_type: "ext4".into(),
                    options_csv: "rw".into(),
                })
            }),
        );
        let err = checker.is_mount_stale("/mnt/x", "nqn.a").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResolveFailed);
    }
}
