pub const DIR_DEV: &str = "/dev";
pub const DIR_PROC: &str = "/proc";
pub const DIR_SYS_CLASS_NVME: &str = "/sys/class/nvme";
pub const DIR_SYS_CLASS_BLOCK: &str = "/sys/class/block";

pub const MODE_MOUNT_TARGET: u32 = 0o750;
pub const MODE_VOLUME_FILE: u32 = 0o640;

pub const UTIL_MOUNT: &str = "mount";
pub const UTIL_UMOUNT: &str = "umount";
pub const UTIL_FINDMNT: &str = "findmnt";
pub const UTIL_BLKID: &str = "blkid";
pub const UTIL_MKFS_EXT4: &str = "mkfs.ext4";
pub const UTIL_MKFS_EXT3: &str = "mkfs.ext3";
pub const UTIL_MKFS_XFS: &str = "mkfs.xfs";
pub const UTIL_RESIZE2FS: &str = "resize2fs";
pub const UTIL_XFS_GROWFS: &str = "xfs_growfs";
pub const UTIL_DF: &str = "df";
pub const UTIL_FSCK_EXT4: &str = "fsck.ext4";
pub const UTIL_FSCK_EXT3: &str = "fsck.ext3";
pub const UTIL_XFS_REPAIR: &str = "xfs_repair";

/// Mounts with this many or more records sharing the same source device are
/// treated as a runaway loop rather than legitimate activity.
pub const MAX_DUPLICATE_MOUNTS_PER_DEVICE: usize = 100;

pub const FORCE_UNMOUNT_POLL_INTERVAL_MS: u64 = 500;

pub const FILESYSTEM_CHECK_DEFAULT_DEADLINE_SECS: u64 = 60;
