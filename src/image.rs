//! Disk image creation, classification, and offset mounting.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::context::BuildContext;
use crate::error::BuilderError;
use crate::resource::{LoopbackAttach, MountFs};
use crate::session::Session;
use crate::step::Step;

/// Size of a freshly created SD-card working image.
pub const IMAGE_SIZE: u64 = 512 * 1024 * 1024;

/// Raw flash dumps come in exactly these two sizes.
pub const IMAGE_SIZE_32M: u64 = 0x200_0000;
pub const IMAGE_SIZE_64M: u64 = 0x400_0000;

/// Byte offset of the root filesystem inside a raw image.
pub const ROOTFS_OFFSET: u64 = 0xe0000;

/// Create a sparse file of `size` bytes.
pub struct EmptyImage {
    pub path: PathBuf,
    pub size: u64,
}

impl Step for EmptyImage {
    type Output = PathBuf;

    fn name(&self) -> &str {
        "empty_image"
    }

    fn run(self, s: &mut Session, _ctx: &mut BuildContext) -> Result<PathBuf> {
        s.debug(format!(
            "Creating {} byte image {}",
            self.size,
            self.path.display()
        ));
        let mut out = File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        if self.size > 0 {
            out.seek(SeekFrom::Start(self.size - 1))?;
            out.write_all(&[0])?;
        }
        Ok(self.path)
    }
}

/// Image classes the mounter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Raw32M,
    Raw64M,
}

/// Classify an image by extension and exact size.
pub fn classify(path: &Path) -> Result<ImageKind> {
    let unrecognized = || BuilderError::ImageFormatUnrecognized(path.to_path_buf());

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(unrecognized)?;

    match extension.as_str() {
        "img" | "bin" => {
            let size = fs::metadata(path)
                .with_context(|| format!("inspecting {}", path.display()))?
                .len();
            match size {
                IMAGE_SIZE_32M => Ok(ImageKind::Raw32M),
                IMAGE_SIZE_64M => Ok(ImageKind::Raw64M),
                _ => Err(unrecognized().into()),
            }
        }
        _ => Err(unrecognized().into()),
    }
}

/// Loop-attach `image` at `offset` and mount the exposed filesystem at
/// `mount_dir`. Both acquisitions register their own cleanups.
pub struct MountAtOffset {
    pub image: PathBuf,
    pub mount_dir: PathBuf,
    pub offset: u64,
    pub fs_type: String,
}

impl Step for MountAtOffset {
    type Output = ();

    fn name(&self) -> &str {
        "mount_at_offset"
    }

    fn flatten(&self) -> bool {
        true
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        let device = s.acquire(ctx, LoopbackAttach::new(&self.image).offset(self.offset))?;
        s.acquire(ctx, MountFs::new(&self.fs_type, device, &self.mount_dir))?;
        Ok(())
    }
}

/// Classify `image` and mount its root filesystem at `mount_dir`.
pub struct MountImage {
    pub image: PathBuf,
    pub mount_dir: PathBuf,
}

impl Step for MountImage {
    type Output = ();

    fn name(&self) -> &str {
        "mount_image"
    }

    fn run(self, s: &mut Session, ctx: &mut BuildContext) -> Result<()> {
        match classify(&self.image)? {
            ImageKind::Raw32M | ImageKind::Raw64M => s.invoke(
                ctx,
                MountAtOffset {
                    image: self.image,
                    mount_dir: self.mount_dir,
                    offset: ROOTFS_OFFSET,
                    fs_type: "ext4".into(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_of_size(dir: &Path, name: &str, size: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_len(size).unwrap();
        path
    }

    #[test]
    fn empty_image_creates_a_sparse_file_of_the_requested_size() {
        let temp = TempDir::new().unwrap();
        let mut s = Session::new();
        let mut ctx = BuildContext::new(temp.path().to_path_buf(), "repo".into());

        let path = s
            .invoke(
                &mut ctx,
                EmptyImage {
                    path: temp.path().join("working.img"),
                    size: IMAGE_SIZE_32M,
                },
            )
            .unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), IMAGE_SIZE_32M);
    }

    #[test]
    fn raw_images_classify_by_extension_and_exact_size() {
        let temp = TempDir::new().unwrap();

        let small = file_of_size(temp.path(), "flash.img", IMAGE_SIZE_32M);
        assert_eq!(classify(&small).unwrap(), ImageKind::Raw32M);

        let large = file_of_size(temp.path(), "flash.bin", IMAGE_SIZE_64M);
        assert_eq!(classify(&large).unwrap(), ImageKind::Raw64M);
    }

    #[test]
    fn unknown_sizes_and_extensions_are_unrecognized() {
        let temp = TempDir::new().unwrap();

        let odd = file_of_size(temp.path(), "flash.img", 12345);
        let err = classify(&odd).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuilderError>(),
            Some(BuilderError::ImageFormatUnrecognized(_))
        ));

        let wrong_ext = file_of_size(temp.path(), "flash.squashfs", IMAGE_SIZE_32M);
        assert!(classify(&wrong_ext).is_err());

        let no_ext = file_of_size(temp.path(), "flash", IMAGE_SIZE_32M);
        assert!(classify(&no_ext).is_err());
    }
}
