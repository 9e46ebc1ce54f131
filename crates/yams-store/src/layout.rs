use crate::StoreError;
use std::path::{Path, PathBuf};

/// Directory layout of the local image tree.
///
/// Images live under `root/<first two chars of name>/<name>`, so `a.jpg` is
/// found at `root/a./a.jpg` and `photo.png` at `root/ph/photo.png`.
#[derive(Debug, Clone)]
pub struct ImageLayout {
    root: PathBuf,
}

impl ImageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The two-char directory prefix for `name`.
    pub fn prefix(name: &str) -> Result<&str, StoreError> {
        match name.char_indices().nth(2) {
            Some((end, _)) => Ok(&name[..end]),
            None if name.chars().count() == 2 => Ok(name),
            None => Err(StoreError::ShortName(name.to_owned())),
        }
    }

    pub fn image_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let prefix = Self::prefix(name)?;
        Ok(self.root.join(prefix).join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_path_uses_two_char_prefix() {
        let layout = ImageLayout::new("/srv/images");
        assert_eq!(
            layout.image_path("a.jpg").unwrap(),
            PathBuf::from("/srv/images/a./a.jpg")
        );
        assert_eq!(
            layout.image_path("photo.png").unwrap(),
            PathBuf::from("/srv/images/ph/photo.png")
        );
    }

    #[test]
    fn two_char_name_is_its_own_prefix() {
        assert_eq!(ImageLayout::prefix("ab").unwrap(), "ab");
    }

    #[test]
    fn prefix_counts_chars_not_bytes() {
        assert_eq!(ImageLayout::prefix("éà.jpg").unwrap(), "éà");
    }

    #[test]
    fn short_names_are_rejected() {
        assert!(matches!(
            ImageLayout::prefix("a"),
            Err(StoreError::ShortName(_))
        ));
        assert!(ImageLayout::prefix("").is_err());
    }
}
