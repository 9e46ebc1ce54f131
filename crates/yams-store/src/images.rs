use crate::layout::ImageLayout;
use crate::scanner::ImageListScanner;
use crate::StoreError;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Descriptor of a local image, valid for a single upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    pub image_name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    /// Lowercase hex MD5 of the file bytes at read time.
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub file_path: PathBuf,
    pub metadata: ImageMetadata,
}

impl Image {
    #[inline]
    pub fn name(&self) -> &str {
        &self.metadata.image_name
    }

    #[inline]
    pub fn checksum(&self) -> &str {
        &self.metadata.checksum
    }
}

/// Capability to open an image's bytes by name.
///
/// The remote client only needs this, not the whole store.
pub trait ImageOpener: Send + Sync {
    fn open(&self, name: &str) -> Result<File, StoreError>;
}

/// Read-only view of the local image tree.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    layout: ImageLayout,
}

impl LocalImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: ImageLayout::new(root),
        }
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    /// Open, stat and hash an image, producing its descriptor.
    pub fn get(&self, name: &str) -> Result<Image, StoreError> {
        let file_path = self.layout.image_path(name)?;
        let mut file = File::open(&file_path).map_err(|source| StoreError::ImageOpen {
            name: name.to_owned(),
            source,
        })?;
        let stat = file.metadata().map_err(|source| StoreError::ImageStat {
            name: name.to_owned(),
            source,
        })?;
        let mod_time = stat
            .modified()
            .map_err(|source| StoreError::ImageStat {
                name: name.to_owned(),
                source,
            })?
            .into();

        let mut hasher = Md5::new();
        io::copy(&mut file, &mut hasher).map_err(|source| StoreError::ImageRead {
            name: name.to_owned(),
            source,
        })?;

        Ok(Image {
            file_path,
            metadata: ImageMetadata {
                image_name: name.to_owned(),
                size: stat.len(),
                mod_time,
                checksum: format!("{:x}", hasher.finalize()),
            },
        })
    }

    /// Open the image list and install a line scanner over it.
    pub fn open_list(path: &Path) -> Result<ImageListScanner<BufReader<File>>, StoreError> {
        let file = File::open(path)?;
        Ok(ImageListScanner::new(BufReader::new(file)))
    }
}

impl ImageOpener for LocalImageStore {
    fn open(&self, name: &str) -> Result<File, StoreError> {
        let path = self.layout.image_path(name)?;
        File::open(path).map_err(|source| StoreError::ImageOpen {
            name: name.to_owned(),
            source,
        })
    }
}
