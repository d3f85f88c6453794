use std::fs::{read_link, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use log::debug;
use rustix::fs::{Dir, Mode};

use crate::constants::{
    self, DIR_PROC, FORCE_UNMOUNT_POLL_INTERVAL_MS, MODE_MOUNT_TARGET, MODE_VOLUME_FILE,
};
use crate::error::AgentError;
use crate::fs::mkdir_p;
use crate::mount_option::{is_bind_mount, sanitize};

/// Filesystem statistics as reported by the host `df` utility.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub avail_bytes: u64,
    pub inodes_total: u64,
    pub inodes_used: u64,
    pub inodes_avail: u64,
}

/// Façade over host mount/format/stat utilities. The production
/// implementation shells out to the named utilities with explicit argument
/// vectors; tests use a hand-written fake.
pub trait Mounter: Send + Sync {
    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), AgentError>;

    fn unmount(&self, target: &str) -> Result<(), AgentError>;

    fn is_likely_mount_point(&self, path: &str) -> bool;

    fn format(&self, device: &str, fs_type: &str) -> Result<(), AgentError>;

    fn is_formatted(&self, device: &str) -> bool;

    fn resize_filesystem(&self, device: &str, mount_point: &str) -> Result<(), AgentError>;

    fn device_stats(&self, path: &str) -> Result<DeviceStats, AgentError>;

    fn is_mount_in_use(&self, path: &str) -> (bool, Vec<u32>);

    fn force_unmount(&self, target: &str, timeout: Duration) -> Result<(), AgentError>;

    fn make_file(&self, path: &str) -> Result<(), AgentError>;

    fn check_filesystem(
        &self,
        device: &str,
        fs_type: &str,
        deadline: Duration,
    ) -> Result<(), AgentError>;
}

/// Production [`Mounter`] backed by real host utilities and `/proc`.
pub struct RealMounter;

impl RealMounter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RealMounter {
    fn default() -> Self {
        Self::new()
    }
}

fn run(util: &'static str, args: &[&str]) -> anyhow::Result<Output> {
    Command::new(util)
        .args(args)
        .output()
        .map_err(|e| anyhow!("unable to run {}: {}", util, e))
}

fn combined_output(output: &Output) -> String {
    let mut s = String::from_utf8_lossy(&output.stdout).into_owned();
    s.push_str(&String::from_utf8_lossy(&output.stderr));
    s
}

impl Mounter for RealMounter {
    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), AgentError> {
        let bind = is_bind_mount(options);
        let sanitized = sanitize(options, bind)?;

        mkdir_p(target, Mode::from_raw_mode(MODE_MOUNT_TARGET)).map_err(|source| {
            AgentError::Fatal {
                context: format!("creating mount target {target}"),
                source,
            }
        })?;

        let options_csv = sanitized.join(",");
        let mut args: Vec<&str> = Vec::new();
        if !fs_type.is_empty() {
            args.push("-t");
            args.push(fs_type);
        }
        if !options_csv.is_empty() {
            args.push("-o");
            args.push(&options_csv);
        }
        args.push(source);
        args.push(target);

        let output = run(constants::UTIL_MOUNT, &args).map_err(|e| AgentError::UtilityFailed {
            util: constants::UTIL_MOUNT,
            target: target.to_string(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(AgentError::UtilityFailed {
                util: constants::UTIL_MOUNT,
                target: target.to_string(),
                detail: combined_output(&output),
            });
        }
        Ok(())
    }

    fn unmount(&self, target: &str) -> Result<(), AgentError> {
        if !self.is_likely_mount_point(target) {
            return Ok(());
        }
        let output =
            run(constants::UTIL_UMOUNT, &[target]).map_err(|e| AgentError::UtilityFailed {
                util: constants::UTIL_UMOUNT,
                target: target.to_string(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(AgentError::UtilityFailed {
                util: constants::UTIL_UMOUNT,
                target: target.to_string(),
                detail: combined_output(&output),
            });
        }
        Ok(())
    }

    fn is_likely_mount_point(&self, path: &str) -> bool {
        run(constants::UTIL_FINDMNT, &["-o", "TARGET", "-n", "-M", path])
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn format(&self, device: &str, fs_type: &str) -> Result<(), AgentError> {
        if self.is_formatted(device) {
            return Ok(());
        }
        let util = match fs_type {
            "ext4" => constants::UTIL_MKFS_EXT4,
            "ext3" => constants::UTIL_MKFS_EXT3,
            "xfs" => constants::UTIL_MKFS_XFS,
            other => {
                return Err(AgentError::UnsupportedFs {
                    fs_type: other.to_string(),
                })
            }
        };
        let flag = if fs_type == "xfs" { "-f" } else { "-F" };
        let output = run(util, &[flag, device]).map_err(|e| AgentError::UtilityFailed {
            util,
            target: device.to_string(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(AgentError::UtilityFailed {
                util,
                target: device.to_string(),
                detail: combined_output(&output),
            });
        }
        Ok(())
    }

    fn is_formatted(&self, device: &str) -> bool {
        match Command::new(constants::UTIL_BLKID)
            .args(["-o", "value", "-s", "TYPE", device])
            .output()
        {
            Ok(output) => output.status.code() == Some(0),
            Err(_) => false,
        }
    }

    fn resize_filesystem(&self, device: &str, mount_point: &str) -> Result<(), AgentError> {
        let fs_type = detect_fs_type(device);
        let (util, arg) = match fs_type.as_deref() {
            Some("ext4") | Some("ext3") | Some("ext2") => (constants::UTIL_RESIZE2FS, device),
            Some("xfs") => (constants::UTIL_XFS_GROWFS, mount_point),
            other => {
                return Err(AgentError::UnsupportedFs {
                    fs_type: other.unwrap_or("unknown").to_string(),
                })
            }
        };
        let output = run(util, &[arg]).map_err(|e| AgentError::UtilityFailed {
            util,
            target: arg.to_string(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(AgentError::UtilityFailed {
                util,
                target: arg.to_string(),
                detail: combined_output(&output),
            });
        }
        Ok(())
    }

    fn device_stats(&self, path: &str) -> Result<DeviceStats, AgentError> {
        let output = run(
            constants::UTIL_DF,
            &["--output=size,used,avail,itotal,iused,iavail", "-B1", path],
        )
        .map_err(|e| AgentError::UtilityFailed {
            util: constants::UTIL_DF,
            target: path.to_string(),
            detail: e.to_string(),
        })?;
        if !output.status.success() {
            return Err(AgentError::UtilityFailed {
                util: constants::UTIL_DF,
                target: path.to_string(),
                detail: combined_output(&output),
            });
        }
        parse_df_output(&combined_output(&output)).ok_or_else(|| AgentError::UtilityFailed {
            util: constants::UTIL_DF,
            target: path.to_string(),
            detail: "unable to parse df output".to_string(),
        })
    }

    fn is_mount_in_use(&self, path: &str) -> (bool, Vec<u32>) {
        is_mount_in_use_at(DIR_PROC, path)
    }

    fn force_unmount(&self, target: &str, timeout: Duration) -> Result<(), AgentError> {
        force_unmount_with(self, target, timeout)
    }

    fn make_file(&self, path: &str) -> Result<(), AgentError> {
        if let Some(parent) = Path::new(path).parent() {
            mkdir_p(parent, Mode::from_raw_mode(MODE_MOUNT_TARGET)).map_err(|source| {
                AgentError::Fatal {
                    context: format!("creating parent of {path}"),
                    source,
                }
            })?;
        }
        match File::options()
            .create_new(true)
            .write(true)
            .open(path)
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(AgentError::Fatal {
                    context: format!("creating volume file {path}"),
                    source: anyhow!(e),
                })
            }
        }
        rustix::fs::chmod(path, Mode::from_raw_mode(MODE_VOLUME_FILE)).map_err(|e| {
            AgentError::Fatal {
                context: format!("chmod of {path}"),
                source: anyhow!(e),
            }
        })?;
        Ok(())
    }

    fn check_filesystem(
        &self,
        device: &str,
        fs_type: &str,
        deadline: Duration,
    ) -> Result<(), AgentError> {
        let (util, args) = check_filesystem_command(fs_type, device)?;
        let mut child = Command::new(util)
            .args(&args)
            .spawn()
            .map_err(|e| AgentError::UtilityFailed {
                util,
                target: device.to_string(),
                detail: e.to_string(),
            })?;

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return if status.success() {
                        Ok(())
                    } else {
                        Err(AgentError::UtilityFailed {
                            util,
                            target: device.to_string(),
                            detail: format!("exit status {status}"),
                        })
                    };
                }
                Ok(None) => {
                    if start.elapsed() >= deadline {
                        return Err(AgentError::UtilityTimedOut {
                            util,
                            target: device.to_string(),
                            deadline_secs: deadline.as_secs(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(AgentError::UtilityFailed {
                        util,
                        target: device.to_string(),
                        detail: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Pick the read-only check utility and argument vector for `fs_type`,
/// mirroring the mkfs-utility dispatch in [`RealMounter::format`].
fn check_filesystem_command<'a>(
    fs_type: &str,
    device: &'a str,
) -> Result<(&'static str, Vec<&'a str>), AgentError> {
    match fs_type {
        "ext4" => Ok((constants::UTIL_FSCK_EXT4, vec!["-n", device])),
        "ext3" => Ok((constants::UTIL_FSCK_EXT3, vec!["-n", device])),
        "xfs" => Ok((constants::UTIL_XFS_REPAIR, vec!["-n", device])),
        other => Err(AgentError::UnsupportedFs {
            fs_type: other.to_string(),
        }),
    }
}

fn detect_fs_type(device: &str) -> Option<String> {
    let output = Command::new(constants::UTIL_BLKID)
        .args(["-o", "value", "-s", "TYPE", device])
        .output()
        .ok()?;
    if output.status.code() != Some(0) {
        return None;
    }
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn parse_df_output(output: &str) -> Option<DeviceStats> {
    let data_line = output.lines().nth(1)?;
    let mut fields = data_line.split_whitespace();
    Some(DeviceStats {
        total_bytes: fields.next()?.parse().ok()?,
        used_bytes: fields.next()?.parse().ok()?,
        avail_bytes: fields.next()?.parse().ok()?,
        inodes_total: fields.next()?.parse().ok()?,
        inodes_used: fields.next()?.parse().ok()?,
        inodes_avail: fields.next()?.parse().ok()?,
    })
}

/// Scan `/proc/<pid>/fd/*` for descriptors pointing at `path` or beneath it.
/// Permission errors on foreign-UID processes are expected and skipped.
fn is_mount_in_use_at(proc_dir: &str, path: &str) -> (bool, Vec<u32>) {
    let canonical = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => return (false, Vec::new()),
    };
    let mut pids = Vec::new();

    let dir_fd = match File::open(proc_dir) {
        Ok(f) => f,
        Err(_) => return (false, Vec::new()),
    };
    let dir = match Dir::read_from(&dir_fd) {
        Ok(d) => d,
        Err(_) => return (false, Vec::new()),
    };

    for entry_res in dir {
        let entry = match entry_res {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name().to_string_lossy().to_string();
        let pid: u32 = match name.parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        let fd_dir = Path::new(proc_dir).join(&name).join("fd");
        let fd_dir_fd = match File::open(&fd_dir) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let fd_entries = match Dir::read_from(&fd_dir_fd) {
            Ok(d) => d,
            Err(_) => continue,
        };
        for fd_entry_res in fd_entries {
            let fd_entry = match fd_entry_res {
                Ok(e) => e,
                Err(_) => continue,
            };
            let fd_name = fd_entry.file_name().to_string_lossy().to_string();
            if fd_name == "." || fd_name == ".." {
                continue;
            }
            let fd_path = fd_dir.join(&fd_name);
            let target = match read_link(&fd_path) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if target == canonical || target.starts_with(&canonical) {
                pids.push(pid);
                break;
            }
        }
    }
    (!pids.is_empty(), pids)
}

fn force_unmount_with(
    mounter: &dyn Mounter,
    target: &str,
    timeout: Duration,
) -> Result<(), AgentError> {
    if mounter.unmount(target).is_ok() && !mounter.is_likely_mount_point(target) {
        return Ok(());
    }

    let start = Instant::now();
    while start.elapsed() < timeout {
        if !mounter.is_likely_mount_point(target) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(FORCE_UNMOUNT_POLL_INTERVAL_MS));
    }

    let (in_use, pids) = mounter.is_mount_in_use(target);
    if in_use {
        return Err(AgentError::MountInUse {
            target: target.to_string(),
            pids,
        });
    }

    let output =
        run(constants::UTIL_UMOUNT, &["-l", target]).map_err(|e| AgentError::UtilityFailed {
            util: constants::UTIL_UMOUNT,
            target: target.to_string(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(AgentError::UtilityFailed {
            util: constants::UTIL_UMOUNT,
            target: target.to_string(),
            detail: combined_output(&output),
        });
    }
    debug!("lazily unmounted {}", target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};
    use std::os::unix::fs::symlink;

    use super::*;

    #[test]
    fn check_filesystem_command_dispatches_ext4_to_fsck_ext4() {
        let (util, args) = check_filesystem_command("ext4", "/dev/nvme0n1").unwrap();
        assert_eq!(util, constants::UTIL_FSCK_EXT4);
        assert_eq!(args, vec!["-n", "/dev/nvme0n1"]);
    }

    #[test]
    fn check_filesystem_command_dispatches_ext3_to_fsck_ext3() {
        let (util, args) = check_filesystem_command("ext3", "/dev/nvme0n1").unwrap();
        assert_eq!(util, constants::UTIL_FSCK_EXT3);
        assert_eq!(args, vec!["-n", "/dev/nvme0n1"]);
    }

    #[test]
    fn check_filesystem_command_dispatches_xfs_to_xfs_repair() {
        let (util, args) = check_filesystem_command("xfs", "/dev/nvme0n1").unwrap();
        assert_eq!(util, constants::UTIL_XFS_REPAIR);
        assert_eq!(args, vec!["-n", "/dev/nvme0n1"]);
    }

    #[test]
    fn check_filesystem_command_rejects_unsupported_fs() {
        let err = check_filesystem_command("btrfs", "/dev/nvme0n1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fatal);
    }

    #[test]
    fn parse_df_output_reads_second_line() {
        let out = "   1000B     200B     800B  100  10  90\n1000 200 800 100 10 90\n";
        let stats = parse_df_output(out).unwrap();
        assert_eq!(
            stats,
            DeviceStats {
                total_bytes: 1000,
                used_bytes: 200,
                avail_bytes: 800,
                inodes_total: 100,
                inodes_used: 10,
                inodes_avail: 90,
            }
        );
    }

    #[test]
    fn is_mount_in_use_detects_open_fd_under_fake_proc() {
        let tmp = tempfile::tempdir().unwrap();
        let target_dir = tmp.path().join("mnt");
        create_dir_all(&target_dir).unwrap();
        let watched_file = target_dir.join("data.bin");
        write(&watched_file, b"x").unwrap();

        let proc_dir = tmp.path().join("proc");
        let fd_dir = proc_dir.join("4321").join("fd");
        create_dir_all(&fd_dir).unwrap();
        symlink(&watched_file, fd_dir.join("3")).unwrap();

        let (in_use, pids) =
            is_mount_in_use_at(proc_dir.to_str().unwrap(), target_dir.to_str().unwrap());
        assert!(in_use);
        assert_eq!(pids, vec![4321]);
    }

    #[test]
    fn is_mount_in_use_false_for_untouched_path() {
        let tmp = tempfile::tempdir().unwrap();
        let target_dir = tmp.path().join("mnt");
        create_dir_all(&target_dir).unwrap();
        let proc_dir = tmp.path().join("proc");
        create_dir_all(&proc_dir).unwrap();

        let (in_use, pids) =
            is_mount_in_use_at(proc_dir.to_str().unwrap(), target_dir.to_str().unwrap());
        assert!(!in_use);
        assert!(pids.is_empty());
    }

    #[test]
    fn is_mount_in_use_skips_non_pid_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let proc_dir = tmp.path().join("proc");
        create_dir_all(proc_dir.join("self")).unwrap();
        let target_dir = tmp.path().join("mnt");
        create_dir_all(&target_dir).unwrap();

        let (in_use, _) =
            is_mount_in_use_at(proc_dir.to_str().unwrap(), target_dir.to_str().unwrap());
        assert!(!in_use);
    }
}
