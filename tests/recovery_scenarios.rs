use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use pretty_assertions::assert_eq;

use nvme_mount_recoverd::{
    mounter::DeviceStats, AgentError, CancellationToken, DeviceResolver, ErrorKind, Mounter,
    NoopMetricsSink, RecoveryConfig, MountRecoverer,
};

struct ScriptedMounter {
    force_unmount: Mutex<Vec<Result<(), AgentError>>>,
    mount: Mutex<Vec<Result<(), AgentError>>>,
}

impl ScriptedMounter {
    fn new(force_unmount: Vec<Result<(), AgentError>>, mount: Vec<Result<(), AgentError>>) -> Self {
        Self {
            force_unmount: Mutex::new(force_unmount),
            mount: Mutex::new(mount),
        }
    }
}

impl Mounter for ScriptedMounter {
    fn mount(
        &self,
        _source: &str,
        _target: &str,
        _fs_type: &str,
        _options: &[String],
    ) -> Result<(), AgentError> {
        let mut q = self.mount.lock().unwrap();
        if q.is_empty() {
            Ok(())
        } else {
            q.remove(0)
        }
    }

    fn unmount(&self, _target: &str) -> Result<(), AgentError> {
        Ok(())
    }

    fn is_likely_mount_point(&self, _path: &str) -> bool {
        false
    }

    fn format(&self, _device: &str, _fs_type: &str) -> Result<(), AgentError> {
        Ok(())
    }

    fn is_formatted(&self, _device: &str) -> bool {
        true
    }

    fn resize_filesystem(&self, _device: &str, _mount_point: &str) -> Result<(), AgentError> {
        Ok(())
    }

    fn device_stats(&self, _path: &str) -> Result<DeviceStats, AgentError> {
        unimplemented!()
    }

    fn is_mount_in_use(&self, _path: &str) -> (bool, Vec<u32>) {
        (false, Vec::new())
    }

    fn force_unmount(&self, _target: &str, _timeout: Duration) -> Result<(), AgentError> {
        let mut q = self.force_unmount.lock().unwrap();
        if q.is_empty() {
            Ok(())
        } else {
            q.remove(0)
        }
    }

    fn make_file(&self, _path: &str) -> Result<(), AgentError> {
        Ok(())
    }

    fn check_filesystem(
        &self,
        _device: &str,
        _fs_type: &str,
        _deadline: Duration,
    ) -> Result<(), AgentError> {
        Ok(())
    }
}

struct FixedResolver(PathBuf);

impl DeviceResolver for FixedResolver {
    fn resolve(&self, _nqn: &str) -> Result<PathBuf, AgentError> {
        Ok(self.0.clone())
    }
}

fn config() -> RecoveryConfig {
    RecoveryConfig::builder()
        .max_attempts(3)
        .initial_backoff(Duration::from_millis(5))
        .backoff_multiplier(1.0)
        .normal_unmount_wait(Duration::from_millis(10))
        .build()
}

#[test]
fn scenario_recovery_succeeds_on_second_attempt() {
    let mounter = ScriptedMounter::new(
        vec![Ok(()), Ok(())],
        vec![
            Err(AgentError::UtilityFailed {
                util: "mount",
                target: "/mnt/vol".into(),
                detail: "device busy".into(),
            }),
            Ok(()),
        ],
    );
    let resolver = FixedResolver(PathBuf::from("/dev/nvme1n1"));
    let metrics = NoopMetricsSink;
    let recoverer = MountRecoverer::new(&mounter, &resolver, &metrics, config());
    let (token, _canceller) = nvme_mount_recoverd::cancel::pair();

    let result = recoverer.recover(&token, "/mnt/vol", "nqn.example:subsys1", "ext4", &[]);

    assert!(result.recovered);
    assert_eq!(result.attempts, 2);
    assert_eq!(result.new_device.as_deref(), Some("/dev/nvme1n1"));
}

#[test]
fn scenario_recovery_refuses_in_use_mount() {
    let mounter = ScriptedMounter::new(
        vec![Err(AgentError::MountInUse {
            target: "/mnt/vol".into(),
            pids: vec![1234, 5678],
        })],
        vec![],
    );
    let resolver = FixedResolver(PathBuf::from("/dev/nvme1n1"));
    let metrics = NoopMetricsSink;
    let recoverer = MountRecoverer::new(&mounter, &resolver, &metrics, config());
    let (token, _canceller) = nvme_mount_recoverd::cancel::pair();

    let result = recoverer.recover(&token, "/mnt/vol", "nqn.example:subsys1", "ext4", &[]);

    assert!(!result.recovered);
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.final_error,
        Some(ErrorKind::MountInUse {
            pids: vec![1234, 5678]
        })
    );
}

#[test]
fn scenario_recovery_honours_cancellation() {
    let mounter = ScriptedMounter::new(vec![], vec![]);
    let resolver = FixedResolver(PathBuf::from("/dev/nvme1n1"));
    let metrics = NoopMetricsSink;
    let recoverer = MountRecoverer::new(&mounter, &resolver, &metrics, config());
    let (token, canceller): (CancellationToken, _) = nvme_mount_recoverd::cancel::pair();
    canceller.trigger();

    let result = recoverer.recover(&token, "/mnt/vol", "nqn.example:subsys1", "ext4", &[]);

    assert!(!result.recovered);
    assert_eq!(result.final_error, Some(ErrorKind::Cancelled));
    assert_eq!(result.attempts, 0);
}

#[test]
fn scenario_recovery_exhausts_attempts_on_persistent_failure() {
    let always_fail = || {
        Err(AgentError::UtilityFailed {
            util: "mount",
            target: "/mnt/vol".into(),
            detail: "no such device".into(),
        })
    };
    let mounter = ScriptedMounter::new(
        vec![Ok(()), Ok(()), Ok(())],
        vec![always_fail(), always_fail(), always_fail()],
    );
    let resolver = FixedResolver(PathBuf::from("/dev/nvme1n1"));
    let metrics = NoopMetricsSink;
    let recoverer = MountRecoverer::new(&mounter, &resolver, &metrics, config());
    let (token, _canceller) = nvme_mount_recoverd::cancel::pair();

    let result = recoverer.recover(&token, "/mnt/vol", "nqn.example:subsys1", "ext4", &[]);

    assert!(!result.recovered);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.final_error, Some(ErrorKind::TransientUtility));
}
