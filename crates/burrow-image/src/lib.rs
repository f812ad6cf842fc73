//! # burrow-image
//!
//! Acquisition of the shared base image used as the read-only lower layer
//! of every container.
//!
//! Handles:
//! - **Pull**: extracting a root filesystem archive into the image directory.
//! - **Hashing**: SHA-256 digests of files and whole directory trees, used
//!   to identify an image and to verify that containers never modify it.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod pull;
