use std::fs::{canonicalize, read_to_string, File};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use rustix::fs::Dir;

use crate::constants::{DIR_DEV, DIR_SYS_CLASS_BLOCK, DIR_SYS_CLASS_NVME};
use crate::error::AgentError;

/// Maps an NVMe Qualified Name to the block device currently exposing it.
pub trait DeviceResolver: Send + Sync {
    fn resolve(&self, nqn: &str) -> Result<PathBuf, AgentError>;

    /// Invalidate any internal cache. A no-op for resolvers that read live
    /// state on every call.
    fn clear_cache(&self) {}
}

/// Resolves an NQN by walking `/sys/class/nvme` for a controller whose
/// `subsysnqn` matches, then returning its first namespace block device.
///
/// Performs no ioctls and decodes no NVMe identify payloads — pure
/// directory/file text reads, walking sysfs the same way one would walk
/// `/dev` by device number.
pub struct SysfsDeviceResolver {
    sys_class_nvme: PathBuf,
    sys_class_block: PathBuf,
}

impl SysfsDeviceResolver {
    pub fn new() -> Self {
        Self {
            sys_class_nvme: PathBuf::from(DIR_SYS_CLASS_NVME),
            sys_class_block: PathBuf::from(DIR_SYS_CLASS_BLOCK),
        }
    }

    #[cfg(test)]
    fn with_root(root: &Path) -> Self {
        Self {
            sys_class_nvme: root.to_path_buf(),
            sys_class_block: root.join("../block"),
        }
    }

    #[cfg(test)]
    fn with_roots(sys_class_nvme: &Path, sys_class_block: &Path) -> Self {
        Self {
            sys_class_nvme: sys_class_nvme.to_path_buf(),
            sys_class_block: sys_class_block.to_path_buf(),
        }
    }
}

impl Default for SysfsDeviceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceResolver for SysfsDeviceResolver {
    fn resolve(&self, nqn: &str) -> Result<PathBuf, AgentError> {
        resolve_in(&self.sys_class_nvme, &self.sys_class_block, nqn).map_err(|source| {
            AgentError::ResolveFailed {
                nqn: nqn.to_string(),
                source,
            }
        })
    }
}

fn resolve_in(sys_class_nvme: &Path, sys_class_block: &Path, nqn: &str) -> anyhow::Result<PathBuf> {
    let dir_fd = File::open(sys_class_nvme)
        .map_err(|e| anyhow!("unable to open {}: {}", sys_class_nvme.display(), e))?;
    let dir = Dir::read_from(&dir_fd)
        .map_err(|e| anyhow!("unable to read {}: {}", sys_class_nvme.display(), e))?;

    for entry_res in dir {
        let entry = entry_res?;
        let ctrl_name = entry.file_name().to_string_lossy().to_string();
        if ctrl_name == "." || ctrl_name == ".." {
            continue;
        }
        let ctrl_path = sys_class_nvme.join(&ctrl_name);
        let nqn_path = ctrl_path.join("subsysnqn");
        let found_nqn = match read_to_string(&nqn_path) {
            Ok(s) => s.trim().to_string(),
            Err(_) => continue,
        };
        if found_nqn != nqn {
            continue;
        }
        if let Ok(dev) = first_namespace_device(&ctrl_path, &ctrl_name) {
            return Ok(dev);
        }
        return block_device_under_controller(sys_class_block, &ctrl_path).map_err(|e| {
            anyhow!(
                "controller {} exposes no namespace and no matching block device: {}",
                ctrl_name,
                e
            )
        });
    }
    Err(anyhow!("no nvme controller found for nqn {}", nqn))
}

fn first_namespace_device(ctrl_path: &Path, ctrl_name: &str) -> anyhow::Result<PathBuf> {
    let dir_fd = File::open(ctrl_path)
        .map_err(|e| anyhow!("unable to open {}: {}", ctrl_path.display(), e))?;
    let dir = Dir::read_from(&dir_fd)
        .map_err(|e| anyhow!("unable to read {}: {}", ctrl_path.display(), e))?;
    let mut namespaces: Vec<String> = Vec::new();
    for entry_res in dir {
        let entry = entry_res?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(ctrl_name) && name != ctrl_name {
            namespaces.push(name);
        }
    }
    namespaces.sort();
    let ns = namespaces
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("controller {} exposes no namespace", ctrl_name))?;
    Ok(Path::new(DIR_DEV).join(ns))
}

/// Fallback for controllers whose namespace device nodes have not appeared
/// under their own sysfs directory yet: scan `/sys/class/block` for an entry
/// whose `device` symlink resolves under the controller's sysfs path.
fn block_device_under_controller(sys_class_block: &Path, ctrl_path: &Path) -> anyhow::Result<PathBuf> {
    let ctrl_canonical = canonicalize(ctrl_path)
        .map_err(|e| anyhow!("unable to canonicalize {}: {}", ctrl_path.display(), e))?;

    let dir_fd = File::open(sys_class_block)
        .map_err(|e| anyhow!("unable to open {}: {}", sys_class_block.display(), e))?;
    let dir = Dir::read_from(&dir_fd)
        .map_err(|e| anyhow!("unable to read {}: {}", sys_class_block.display(), e))?;

    let mut candidates: Vec<String> = Vec::new();
    for entry_res in dir {
        let entry = entry_res?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }
        let device_link = sys_class_block.join(&name).join("device");
        let device_canonical = match canonicalize(&device_link) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if device_canonical == ctrl_canonical || device_canonical.starts_with(&ctrl_canonical) {
            candidates.push(name);
        }
    }
    candidates.sort();
    let name = candidates.into_iter().next().ok_or_else(|| {
        anyhow!(
            "no block device under {} resolves to {}",
            sys_class_block.display(),
            ctrl_path.display()
        )
    })?;
    Ok(Path::new(DIR_DEV).join(name))
}
