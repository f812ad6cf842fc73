//! Base image acquisition.
//!
//! Populates the shared image directory from a root filesystem archive
//! (for example an `ubuntu-base` or `alpine-minirootfs` tarball).

use std::path::{Path, PathBuf};

use burrow_common::error::{BurrowError, Result};

use crate::hash::{self, Sha256Hash};

/// A pulled base image.
#[derive(Debug, Clone)]
pub struct Image {
    /// Directory holding the extracted root filesystem.
    pub path: PathBuf,
    /// Digest of the extracted tree.
    pub digest: Sha256Hash,
    /// Size of the source archive in bytes.
    pub archive_bytes: u64,
}

/// Extracts a root filesystem archive into `image_dir`.
///
/// Supports plain `.tar` and gzip-compressed `.tar.gz` / `.tgz` archives.
/// Permissions recorded in the archive are preserved, as a root
/// filesystem needs its setuid bits intact; ownership is preserved too when
/// running as root (the only case in which `chown` can succeed).
/// Existing files in `image_dir` are overwritten; the image must not be
/// pulled while containers are running on it.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened, extraction fails, or
/// the extracted tree cannot be hashed.
pub fn pull(archive_path: &Path, image_dir: &Path) -> Result<Image> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %image_dir.display(),
        "pulling base image"
    );

    std::fs::create_dir_all(image_dir).map_err(|e| BurrowError::io(image_dir, e))?;

    let file = std::fs::File::open(archive_path).map_err(|e| BurrowError::io(archive_path, e))?;
    let archive_bytes = file
        .metadata()
        .map_err(|e| BurrowError::io(archive_path, e))?
        .len();

    if is_gzip_archive(archive_path) {
        unpack(tar::Archive::new(flate2::read::GzDecoder::new(file)), image_dir)?;
    } else {
        unpack(tar::Archive::new(file), image_dir)?;
    }

    let digest = hash::digest_tree(image_dir)?;
    tracing::info!(digest = %digest, size = archive_bytes, "base image ready");

    Ok(Image {
        path: image_dir.to_path_buf(),
        digest,
        archive_bytes,
    })
}

fn unpack<R: std::io::Read>(mut archive: tar::Archive<R>, target: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_ownerships(nix::unistd::geteuid().is_root());
    archive.set_unpack_xattrs(true);
    archive
        .unpack(target)
        .map_err(|e| BurrowError::io(target, e))
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_file<W: std::io::Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, data).expect("failed to append data");
    }

    fn create_rootfs_tar_gz(dir: &Path) -> PathBuf {
        let path = dir.join("rootfs.tar.gz");
        let file = std::fs::File::create(&path).expect("failed to create tar.gz");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_file(&mut builder, "bin/hello", b"#!/bin/sh\necho hello\n");
        append_file(&mut builder, "etc/hostname", b"burrow\n");
        let encoder = builder.into_inner().expect("failed to finish tar");
        let _ = encoder.finish().expect("failed to finish gzip");
        path
    }

    #[test]
    fn pull_gzip_archive_populates_image_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = create_rootfs_tar_gz(dir.path());
        let image_dir = dir.path().join("image");

        let image = pull(&archive, &image_dir).expect("pull failed");
        assert_eq!(image.path, image_dir);
        assert!(image.archive_bytes > 0);
        assert_eq!(
            std::fs::read_to_string(image_dir.join("etc/hostname")).unwrap(),
            "burrow\n"
        );
        assert_eq!(image.digest, hash::digest_tree(&image_dir).unwrap());
    }

    #[test]
    fn pull_plain_tar_preserves_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("rootfs.tar");
        let mut builder = tar::Builder::new(std::fs::File::create(&archive).unwrap());
        append_file(&mut builder, "bin/tool", b"tool");
        builder.finish().unwrap();

        let image_dir = dir.path().join("image");
        let _ = pull(&archive, &image_dir).expect("pull failed");
        let mode = std::fs::metadata(image_dir.join("bin/tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn pull_missing_archive_returns_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = pull(&dir.path().join("missing.tar.gz"), &dir.path().join("image")).unwrap_err();
        assert!(matches!(err, BurrowError::Io { .. }));
    }

    #[test]
    fn is_gzip_archive_detects_extensions() {
        assert!(is_gzip_archive(Path::new("ubuntu-base.tar.gz")));
        assert!(is_gzip_archive(Path::new("alpine.tgz")));
        assert!(!is_gzip_archive(Path::new("rootfs.tar")));
    }
}
