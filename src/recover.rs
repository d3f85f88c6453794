use log::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{RecoveryConfig, RecoveryResult};
use crate::device::DeviceResolver;
use crate::error::{AgentError, ErrorKind};
use crate::metrics::MetricsSink;
use crate::mounter::Mounter;
use crate::stale::StaleMountChecker;

/// Orchestrates unmount -> resolve -> mount against a single mount path,
/// retrying transient failures with exponential backoff and refusing to
/// force an in-use mount.
pub struct MountRecoverer<'a> {
    mounter: &'a dyn Mounter,
    resolver: &'a dyn DeviceResolver,
    metrics: &'a dyn MetricsSink,
    config: RecoveryConfig,
}

impl<'a> MountRecoverer<'a> {
    pub fn new(
        mounter: &'a dyn Mounter,
        resolver: &'a dyn DeviceResolver,
        metrics: &'a dyn MetricsSink,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            mounter,
            resolver,
            metrics,
            config,
        }
    }

    pub fn recover(
        &self,
        ctx: &CancellationToken,
        mount_path: &str,
        nqn: &str,
        fs_type: &str,
        options: &[String],
    ) -> RecoveryResult {
        let old_device = self.best_effort_old_device(mount_path, nqn);

        let mut last_error: Option<AgentError> = None;

        for attempt in 1..=self.config.max_attempts {
            if ctx.is_cancelled() {
                let result = RecoveryResult::failure(attempt - 1, old_device, ErrorKind::Cancelled);
                self.metrics.record_stale_recovery(result.final_error.as_ref());
                return result;
            }

            debug!("recovery attempt {attempt} for {mount_path}");

            match self.attempt_once(mount_path, nqn, fs_type, options) {
                Ok(new_device) => {
                    info!("recovered {mount_path} onto {new_device} after {attempt} attempt(s)");
                    let result = RecoveryResult::success(attempt, old_device, new_device);
                    self.metrics.record_stale_recovery(None);
                    return result;
                }
                Err(err) if matches!(err, AgentError::MountInUse { .. }) => {
                    warn!("{mount_path} is in use, refusing to force unmount: {err}");
                    let result = RecoveryResult::failure(attempt, old_device, err.kind());
                    self.metrics.record_stale_recovery(result.final_error.as_ref());
                    return result;
                }
                Err(err) => {
                    warn!("recovery attempt {attempt} for {mount_path} failed: {err}");
                    last_error = Some(err);
                    if attempt < self.config.max_attempts {
                        let backoff = self.config.backoff_for_attempt(attempt);
                        if ctx.sleep(backoff) {
                            let result = RecoveryResult::failure(
                                attempt,
                                old_device,
                                ErrorKind::Cancelled,
                            );
                            self.metrics
                                .record_stale_recovery(result.final_error.as_ref());
                            return result;
                        }
                    }
                }
            }
        }

        let kind = last_error
            .as_ref()
            .map(AgentError::kind)
            .unwrap_or(ErrorKind::Fatal);
        let result = RecoveryResult::failure(self.config.max_attempts, old_device, kind);
        self.metrics.record_stale_recovery(result.final_error.as_ref());
        result
    }

    fn best_effort_old_device(&self, mount_path: &str, nqn: &str) -> Option<String> {
        let checker = StaleMountChecker::new(self.resolver);
        checker
            .get_stale_info(mount_path, nqn)
            .ok()
            .and_then(|info| info.mounted_device)
    }

    fn attempt_once(
        &self,
        mount_path: &str,
        nqn: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<String, AgentError> {
        self.mounter
            .force_unmount(mount_path, self.config.normal_unmount_wait)?;
        let device = self.resolver.resolve(nqn)?;
        let device_str = device.display().to_string();
        self.mounter
            .mount(&device_str, mount_path, fs_type, options)?;
        Ok(device_str)
    }
}
