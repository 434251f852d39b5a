//! System-wide constants and default paths.

/// Default directory under which per-partition mountpoints are created.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Default shared directory holding NBD lease files.
pub const DEFAULT_LOCK_DIR: &str = "/run/lock/imgmount";

/// Default number of NBD devices (`/dev/nbd0` .. `/dev/nbd15`) in the pool.
pub const DEFAULT_MAX_NBD_DEVICES: u32 = 16;

/// Default lease lifetime for a claimed NBD device, in seconds.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 6 * 60 * 60;

/// Default privilege-escalation tool prefixed to every device command.
pub const DEFAULT_PRIVILEGE_TOOL: &str = "sudo";

/// Partitions smaller than this many bytes are never mounted.
pub const MIN_PARTITION_SIZE: u64 = 100_000_000;

/// Filesystem types the partition inspector considers worth mounting.
pub const SUPPORTED_FILESYSTEMS: &[&str] = &["ext2", "ext3", "ext4", "xfs", "ntfs", "vfat", "dos"];

/// File extensions of copy-on-write virtual disk formats served through NBD.
pub const NBD_IMAGE_EXTENSIONS: &[&str] = &["qcow2", "qcow", "vmdk", "vdi", "vhd", "vhdx"];

/// Magic bytes at offset 0 of every qcow/qcow2 image.
pub const QCOW_MAGIC: [u8; 4] = *b"QFI\xfb";

/// Prefix of NBD device nodes.
pub const NBD_DEVICE_PREFIX: &str = "/dev/nbd";

/// Prefix of loop device nodes.
pub const LOOP_DEVICE_PREFIX: &str = "/dev/loop";

/// Environment variable overriding the mount root.
pub const ENV_MOUNT_ROOT: &str = "IMGMOUNT_MOUNT_ROOT";
/// Environment variable overriding the host identity used in lock names.
pub const ENV_HOSTNAME: &str = "IMGMOUNT_HOSTNAME";
/// Environment variable overriding the lease directory.
pub const ENV_LOCK_DIR: &str = "IMGMOUNT_LOCK_DIR";
/// Environment variable overriding the NBD pool size.
pub const ENV_NBD_DEVICES: &str = "IMGMOUNT_NBD_DEVICES";
/// Environment variable overriding the lease timeout (seconds).
pub const ENV_LOCK_TIMEOUT: &str = "IMGMOUNT_LOCK_TIMEOUT";
/// Environment variable overriding the privilege tool. Empty disables it.
pub const ENV_PRIVILEGE_TOOL: &str = "IMGMOUNT_PRIVILEGE_TOOL";

/// Environment variable set for commands started by `imgmount run`.
pub const ENV_MOUNTPOINTS: &str = "IMGMOUNT_MOUNTPOINTS";

/// Application name used in CLI output.
pub const APP_NAME: &str = "imgmount";
