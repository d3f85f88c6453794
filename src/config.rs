use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_normal_unmount_wait() -> Duration {
    Duration::from_secs(10)
}

/// Tunables for [`crate::recover::MountRecoverer::recover`].
///
/// Derives `Serialize`/`Deserialize` purely so a higher layer can embed this
/// value inside its own configuration document; this crate never loads one
/// itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff", with = "duration_secs_f64")]
    pub initial_backoff: Duration,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_normal_unmount_wait", with = "duration_secs_f64")]
    pub normal_unmount_wait: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            normal_unmount_wait: default_normal_unmount_wait(),
        }
    }
}

impl RecoveryConfig {
    pub fn builder() -> RecoveryConfigBuilder {
        RecoveryConfigBuilder::default()
    }

    /// Backoff duration for attempt `k` (1-indexed): `initial · multiplier^(k-1)`.
    pub fn backoff_for_attempt(&self, k: u32) -> Duration {
        let exponent = k.saturating_sub(1);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        Duration::from_secs_f64(self.initial_backoff.as_secs_f64() * factor)
    }
}

#[derive(Default)]
pub struct RecoveryConfigBuilder {
    inner: Option<RecoveryConfig>,
}

impl RecoveryConfigBuilder {
    fn get(&mut self) -> &mut RecoveryConfig {
        self.inner.get_or_insert_with(RecoveryConfig::default)
    }

    pub fn max_attempts(mut self, v: u32) -> Self {
        self.get().max_attempts = v;
        self
    }

    pub fn initial_backoff(mut self, v: Duration) -> Self {
        self.get().initial_backoff = v;
        self
    }

    pub fn backoff_multiplier(mut self, v: f64) -> Self {
        self.get().backoff_multiplier = v;
        self
    }

    pub fn normal_unmount_wait(mut self, v: Duration) -> Self {
        self.get().normal_unmount_wait = v;
        self
    }

    pub fn build(self) -> RecoveryConfig {
        self.inner.unwrap_or_default()
    }
}

mod duration_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Outcome of a single [`crate::recover::MountRecoverer::recover`] call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub recovered: bool,
    pub attempts: u32,
    pub final_error: Option<ErrorKind>,
    pub old_device: Option<String>,
    pub new_device: Option<String>,
}

impl RecoveryResult {
    pub fn success(attempts: u32, old_device: Option<String>, new_device: String) -> Self {
        Self {
            recovered: true,
            attempts,
            final_error: None,
            old_device,
            new_device: Some(new_device),
        }
    }

    pub fn failure(attempts: u32, old_device: Option<String>, final_error: ErrorKind) -> Self {
        Self {
            recovered: false,
            attempts,
            final_error: Some(final_error),
            old_device,
            new_device: None,
        }
    }
}
