//! The block device handle: one image attached, inspected, mounted, and
//! released.
//!
//! ```text
//! Unattached --setup--> Attached --mount--> Mounted
//!                          ^                   |
//!                          +------umount-------+
//! any state --teardown--> Released
//! ```
//!
//! Operations invoked out of order are rejected with
//! [`ImgmountError::InvalidState`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgmount_common::config::ImgmountConfig;
use imgmount_common::error::{ImgmountError, Result};
use imgmount_common::types::{BackendKind, DeviceState};

use crate::allocator::NbdAllocator;
use crate::attach::{self, Attachment};
use crate::command::{CommandRunner, SystemRunner, Tools, path_arg};
use crate::image;
use crate::inspect;
use crate::lock::{DirLockStore, Lease, LockStore};
use crate::mount;
use crate::tools;
use crate::topology::{self, BlockDeviceInfo};

/// A disk image mapped to a kernel block device.
///
/// ```no_run
/// use imgmount_common::config::ImgmountConfig;
/// use imgmount_core::device::BlockDevice;
///
/// # fn main() -> imgmount_common::error::Result<()> {
/// let mut device = BlockDevice::open("/evidence/disk.dd", ImgmountConfig::from_env()?)?;
/// let mountpoints = device.mount(None)?.to_vec();
/// // read files under `mountpoints`
/// device.teardown()?;
/// # Ok(())
/// # }
/// ```
pub struct BlockDevice {
    image_path: PathBuf,
    display_name: Option<String>,
    config: ImgmountConfig,
    tools: Tools,
    lock_store: Arc<dyn LockStore>,
    state: DeviceState,
    backend: Option<BackendKind>,
    device: Option<String>,
    topology: Option<BlockDeviceInfo>,
    partitions: Vec<String>,
    mountpoints: Vec<PathBuf>,
    lease: Option<Lease>,
}

impl std::fmt::Debug for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDevice")
            .field("image_path", &self.image_path)
            .field("state", &self.state)
            .field("backend", &self.backend)
            .field("device", &self.device)
            .field("partitions", &self.partitions)
            .field("mountpoints", &self.mountpoints)
            .field("lease", &self.lease.as_ref().map(|l| l.name.as_str()))
            .finish_non_exhaustive()
    }
}

impl BlockDevice {
    /// Creates an unattached handle for `image_path`.
    ///
    /// Nothing touches the host until [`setup`](Self::setup) is called.
    pub fn new(
        image_path: impl Into<PathBuf>,
        config: ImgmountConfig,
        runner: Arc<dyn CommandRunner>,
        lock_store: Arc<dyn LockStore>,
    ) -> Self {
        let tools = Tools::new(runner, config.privilege_tool.clone());
        Self {
            image_path: image_path.into(),
            display_name: None,
            config,
            tools,
            lock_store,
            state: DeviceState::Unattached,
            backend: None,
            device: None,
            topology: None,
            partitions: Vec::new(),
            mountpoints: Vec::new(),
            lease: None,
        }
    }

    /// Creates a handle using the host's tools and the configured lease
    /// directory, and attaches it.
    ///
    /// # Errors
    ///
    /// Returns any error from [`setup`](Self::setup).
    pub fn open(image_path: impl Into<PathBuf>, config: ImgmountConfig) -> Result<Self> {
        let store = Arc::new(DirLockStore::new(config.lock_dir.clone()));
        let mut device = Self::new(image_path, config, Arc::new(SystemRunner), store);
        device.setup()?;
        Ok(device)
    }

    /// Sets the name the image was uploaded under. Its extension decides
    /// the backend when the path itself carries none.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Path of the source image.
    #[must_use]
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> DeviceState {
        self.state
    }

    /// Backend the image is attached with.
    #[must_use]
    pub const fn backend(&self) -> Option<BackendKind> {
        self.backend
    }

    /// Attached device node, e.g. `/dev/loop0`.
    #[must_use]
    pub fn device_node(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Topology reported for the device at setup.
    #[must_use]
    pub const fn topology(&self) -> Option<&BlockDeviceInfo> {
        self.topology.as_ref()
    }

    /// Device nodes of the partitions worth mounting.
    #[must_use]
    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    /// Active mountpoints, in mount order.
    #[must_use]
    pub fn mountpoints(&self) -> &[PathBuf] {
        &self.mountpoints
    }

    /// Lease held on the NBD device, if any.
    #[must_use]
    pub const fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// Returns whether the handle still holds a mount, a device, or a lease.
    #[must_use]
    pub fn holds_resources(&self) -> bool {
        !self.mountpoints.is_empty() || self.device.is_some() || self.lease.is_some()
    }

    fn invalid_state(&self, operation: &'static str) -> ImgmountError {
        ImgmountError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    fn allocator(&self) -> Result<NbdAllocator> {
        NbdAllocator::from_config(Arc::clone(&self.lock_store), &self.config)
    }

    /// Attaches the image and discovers its relevant partitions.
    ///
    /// If inspection fails, the device is detached and then its lease is
    /// released before the error is returned. Anything that cannot be
    /// released stays tracked on the handle for [`teardown`](Self::teardown).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a tool is missing,
    /// the image is unusable, no device can be attached, or inspection
    /// fails. A failed rollback is reported together with the inspection
    /// error as [`ImgmountError::Multiple`].
    pub fn setup(&mut self) -> Result<()> {
        if self.state != DeviceState::Unattached || self.holds_resources() {
            return Err(self.invalid_state("set up"));
        }
        self.config.validate()?;
        tools::ensure_available(&self.tools)?;

        let backend = image::classify_image(&self.image_path, self.display_name.as_deref())?;
        let image = path_arg(&self.image_path)?;
        let attachment = match backend {
            BackendKind::Loop => attach::attach_loop(&self.tools, &image)?,
            BackendKind::Nbd => attach::attach_nbd(&self.tools, &self.allocator()?, &image)?,
        };

        if let Err(e) = self.inspect(&attachment) {
            tracing::error!(device = %attachment.device, error = %e, "inspection failed, rolling back attach");
            return Err(match self.rollback(attachment) {
                Some(rollback) => ImgmountError::Multiple {
                    errors: vec![e, rollback],
                },
                None => e,
            });
        }

        tracing::info!(
            image = %self.image_path.display(),
            device = %attachment.device,
            backend = %attachment.backend,
            partitions = ?self.partitions,
            "block device ready"
        );
        self.backend = Some(attachment.backend);
        self.device = Some(attachment.device);
        self.lease = attachment.lease;
        self.state = DeviceState::Attached;
        Ok(())
    }

    fn inspect(&mut self, attachment: &Attachment) -> Result<()> {
        let info = topology::query_topology(&self.tools, &attachment.device)?;
        self.partitions =
            inspect::relevant_partitions(&self.tools, &info, self.config.min_partition_size)?;
        self.topology = Some(info);
        Ok(())
    }

    /// Undoes a fresh attachment. Whatever cannot be released stays tracked
    /// on the handle so [`teardown`](Self::teardown) can retry it; the lease
    /// is only released once the device is detached.
    fn rollback(&mut self, attachment: Attachment) -> Option<ImgmountError> {
        self.topology = None;
        self.partitions.clear();
        self.backend = Some(attachment.backend);
        self.device = Some(attachment.device);
        self.lease = attachment.lease;

        let result = self.detach_device().and_then(|()| self.release_lease());
        if self.holds_resources() {
            tracing::error!(
                device = ?self.device,
                lease = ?self.lease.as_ref().map(|l| l.name.as_str()),
                "rollback incomplete, resources remain tracked for teardown"
            );
        } else {
            self.backend = None;
        }
        result.err()
    }

    /// Mounts one partition, every relevant partition, or the whole device.
    ///
    /// With `partition` set, it must be one of [`partitions`](Self::partitions).
    /// Without it, every relevant partition is mounted, or the whole device
    /// when none were found. Returns all active mountpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::PartitionNotFound`] for an unknown
    /// partition, or the first probe or mount failure. Mountpoints created
    /// before a failure stay recorded.
    pub fn mount(&mut self, partition: Option<&str>) -> Result<&[PathBuf]> {
        if !matches!(self.state, DeviceState::Attached | DeviceState::Mounted) {
            return Err(self.invalid_state("mount"));
        }
        let device = self
            .device
            .as_deref()
            .ok_or_else(|| self.invalid_state("mount"))?;

        let targets = mount::select_targets(device, &self.partitions, partition)?;
        if targets.is_empty() {
            return Err(ImgmountError::NothingToMount);
        }

        for target in targets {
            let mountpoint = mount::mount_target(&self.tools, &target, &self.config.mount_root)?;
            self.mountpoints.push(mountpoint);
            self.state = DeviceState::Mounted;
        }
        Ok(&self.mountpoints)
    }

    /// Unmounts every active mountpoint and removes its directory.
    ///
    /// Stops at the first failure; mountpoints unmounted before it are
    /// dropped, the failing one and the rest remain tracked.
    ///
    /// # Errors
    ///
    /// Returns the first `umount` failure.
    pub fn umount(&mut self) -> Result<()> {
        match self.state {
            DeviceState::Mounted => {}
            DeviceState::Attached => return Ok(()),
            _ => return Err(self.invalid_state("unmount")),
        }
        self.unmount_all()?;
        self.state = DeviceState::Attached;
        Ok(())
    }

    fn unmount_all(&mut self) -> Result<()> {
        while let Some(mountpoint) = self.mountpoints.first() {
            mount::unmount(&self.tools, mountpoint)?;
            let _ = self.mountpoints.remove(0);
        }
        Ok(())
    }

    fn detach_device(&mut self) -> Result<()> {
        if let (Some(backend), Some(device)) = (self.backend, self.device.as_deref()) {
            attach::detach(&self.tools, backend, device)?;
        }
        self.device = None;
        Ok(())
    }

    fn release_lease(&mut self) -> Result<()> {
        if let Some(lease) = &self.lease {
            self.allocator()?.release(lease)?;
        }
        self.lease = None;
        Ok(())
    }

    fn finish_teardown(&mut self) {
        self.partitions.clear();
        self.topology = None;
        self.state = DeviceState::Released;
        tracing::info!(image = %self.image_path.display(), "block device released");
    }

    /// Releases everything: unmounts, detaches the device, releases the
    /// lease. Stops at and returns the first failure; calling again retries
    /// the remaining steps.
    ///
    /// A handle that holds nothing is left as is.
    ///
    /// # Errors
    ///
    /// Returns the first unmount, detach, or lease release failure.
    pub fn teardown(&mut self) -> Result<()> {
        if !self.holds_resources() {
            return Ok(());
        }
        self.unmount_all()?;
        if self.state == DeviceState::Mounted {
            self.state = DeviceState::Attached;
        }
        self.detach_device()?;
        self.release_lease()?;
        self.finish_teardown();
        Ok(())
    }

    /// Like [`teardown`](Self::teardown), but attempts every unmount even
    /// when an earlier one fails.
    ///
    /// The device is only detached once nothing is mounted from it, and the
    /// lease is only released once the device is detached. Whatever remains
    /// stays tracked for a later retry.
    ///
    /// # Errors
    ///
    /// Returns every failure, aggregated into one error.
    pub fn teardown_best_effort(&mut self) -> Result<()> {
        if !self.holds_resources() {
            return Ok(());
        }

        let mut errors = Vec::new();
        let mut remaining = Vec::new();
        for mountpoint in std::mem::take(&mut self.mountpoints) {
            if let Err(e) = mount::unmount(&self.tools, &mountpoint) {
                errors.push(e);
                remaining.push(mountpoint);
            }
        }
        self.mountpoints = remaining;

        if self.mountpoints.is_empty() {
            if self.state == DeviceState::Mounted {
                self.state = DeviceState::Attached;
            }
            if let Err(e) = self.detach_device().and_then(|()| self.release_lease()) {
                errors.push(e);
            }
        } else {
            tracing::warn!(
                remaining = self.mountpoints.len(),
                "device still mounted, keeping it attached"
            );
        }

        if let Some(err) = ImgmountError::aggregate(errors) {
            tracing::error!(error = %err, "best-effort teardown incomplete");
            return Err(err);
        }
        self.finish_teardown();
        Ok(())
    }
}

impl Drop for BlockDevice {
    fn drop(&mut self) {
        if self.holds_resources() {
            tracing::warn!(
                image = %self.image_path.display(),
                device = ?self.device,
                mountpoints = ?self.mountpoints,
                lease = ?self.lease.as_ref().map(|l| l.name.as_str()),
                "block device dropped without teardown"
            );
        }
    }
}
