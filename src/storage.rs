use std::path::{Component, Path, PathBuf};

use async_std::fs;
use async_std::io::WriteExt;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Uploaded images are stored below this prefix.
pub const IMAGE_PREFIX: &str = "images";

/// Longest stored name, matching the `items.image` column.
pub const MAX_NAME_LENGTH: usize = 100;

#[derive(Error, Debug)]
pub enum Error {
    #[error("media storage I/O error")]
    Io(#[from] std::io::Error),
    #[error("invalid media path: {0:?}")]
    InvalidPath(String),
}

/// File area that uploaded images live in.
#[derive(Clone, Debug)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MediaStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, Error> {
        let relative = Path::new(name);
        let is_plain = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(Error::InvalidPath(name.to_string()));
        }

        Ok(self.root.join(relative))
    }

    /// Store an uploaded image and return its name relative to the storage root.
    ///
    /// Only the last component of `file_name` is kept and its stem is shortened so the
    /// returned name fits in [`MAX_NAME_LENGTH`] characters. Files are created exclusively: a
    /// name that is already taken gets a short content hash appended to its stem, then a
    /// random one.
    #[tracing::instrument(skip(self, data), fields(len = data.len()))]
    pub async fn save_image(&self, file_name: &str, data: &[u8]) -> Result<String, Error> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidPath(file_name.to_string()))?;

        fs::create_dir_all(self.root.join(IMAGE_PREFIX)).await?;
        let digest = hex::encode(Sha256::digest(data));

        let mut suffix: Option<String> = None;
        loop {
            let name = available_name(base, suffix.as_deref())?;
            let path = self.resolve(&name)?;

            let mut file = match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::debug!(%name, "Image name taken");
                    suffix = Some(match suffix {
                        None => digest[..7].to_string(),
                        Some(_) => uuid::Uuid::new_v4().simple().to_string()[..7].to_string(),
                    });
                    continue;
                },
                Err(err) => return Err(err.into()),
            };

            let written = async {
                file.write_all(data).await?;
                file.flush().await
            }
            .await;
            if let Err(err) = written {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(err.into());
            }

            tracing::info!(%name, "Stored image");
            return Ok(name);
        }
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, Error> {
        Ok(fs::read(self.resolve(name)?).await?)
    }

    pub async fn delete(&self, name: &str) -> Result<bool, Error> {
        match fs::remove_file(self.resolve(name)?).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Build `images/<stem>[_<suffix>]<ext>`, cutting the stem short to stay within
/// [`MAX_NAME_LENGTH`] characters.
fn available_name(base: &str, suffix: Option<&str>) -> Result<String, Error> {
    let (stem, extension) = match base.rfind('.') {
        Some(dot) if dot > 0 => base.split_at(dot),
        _ => (base, ""),
    };
    let suffix = suffix.map(|s| format!("_{}", s)).unwrap_or_default();

    let fixed = IMAGE_PREFIX.chars().count() + 1 + suffix.chars().count() + extension.chars().count();
    let budget = match MAX_NAME_LENGTH.checked_sub(fixed) {
        Some(budget) if budget > 0 => budget,
        _ => return Err(Error::InvalidPath(base.to_string())),
    };
    let stem: String = stem.chars().take(budget).collect();

    Ok(format!("{}/{}{}{}", IMAGE_PREFIX, stem, suffix, extension))
}
