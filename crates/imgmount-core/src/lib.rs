//! # imgmount-core
//!
//! Exposes forensic disk images as read-only mounted filesystems.
//!
//! This crate provides:
//! - **Attachment**: raw images on loop devices, copy-on-write virtual disks
//!   (qcow2, vmdk, ...) on NBD devices.
//! - **NBD pool allocation**: exclusive claims on `/dev/nbdN` shared by every
//!   worker process on a host, through expiring leases.
//! - **Partition inspection**: discovery of the partitions worth analysing.
//! - **Mount lifecycle**: read-only mounts with journal replay disabled, and
//!   ordered teardown of every acquired resource.
//!
//! All kernel interaction goes through external tools invoked via
//! [`command::CommandRunner`]. With the `testing` feature,
//! `testing::ScriptedRunner` replaces them in tests.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod allocator;
pub mod attach;
pub mod command;
pub mod device;
pub mod image;
pub mod inspect;
pub mod lock;
pub mod mount;
pub mod probe;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;
pub mod topology;

pub use device::BlockDevice;
