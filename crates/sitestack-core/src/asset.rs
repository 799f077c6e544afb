//! File assets: local code or content uploaded to the bootstrap bucket before deployment.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Error, Result, Token};

/// Qualifier of the bootstrap environment the assets are published into.
pub const BOOTSTRAP_QUALIFIER: &str = "hnb659fds";

/// How an asset is packaged for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// A directory, uploaded as a zip archive.
    ZipDirectory,
    /// A single file, uploaded as-is.
    File,
}

impl Packaging {
    pub fn as_str(&self) -> &'static str {
        match self {
            Packaging::ZipDirectory => "zip",
            Packaging::File => "file",
        }
    }
}

/// A fingerprinted local asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    pub source_path: PathBuf,
    pub hash: String,
    pub packaging: Packaging,
}

impl FileAsset {
    /// Fingerprint `path` and describe it as an asset.
    pub fn from_path(path: impl AsRef<Path>, hasher: &dyn AssetHasher) -> Result<Self> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| Error::Asset {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let packaging = if metadata.is_dir() {
            Packaging::ZipDirectory
        } else {
            Packaging::File
        };
        let hash = hasher.fingerprint(path)?;
        debug!(path = %path.display(), %hash, "Fingerprinted asset");
        Ok(Self {
            source_path: path.to_path_buf(),
            hash,
            packaging,
        })
    }

    /// Object key inside the asset bucket.
    pub fn object_key(&self) -> String {
        match self.packaging {
            Packaging::ZipDirectory => format!("{}.zip", self.hash),
            Packaging::File => {
                let ext = self
                    .source_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| format!(".{e}"))
                    .unwrap_or_default();
                format!("{}{}", self.hash, ext)
            }
        }
    }

    /// Name of the staging directory inside the cloud assembly.
    pub fn staged_name(&self) -> String {
        format!("asset.{}", self.hash)
    }

    pub fn bucket_name() -> Token {
        Token::Sub(format!(
            "cdk-{BOOTSTRAP_QUALIFIER}-assets-${{AWS::AccountId}}-${{AWS::Region}}"
        ))
    }

    pub fn bucket_arn() -> Token {
        Token::Sub(format!(
            "arn:${{AWS::Partition}}:s3:::cdk-{BOOTSTRAP_QUALIFIER}-assets-${{AWS::AccountId}}-${{AWS::Region}}"
        ))
    }
}

/// Computes a stable content fingerprint for an asset path.
pub trait AssetHasher {
    fn fingerprint(&self, path: &Path) -> Result<String>;
}

/// SHA-256 over sorted relative paths and file contents.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryHasher;

impl AssetHasher for DirectoryHasher {
    fn fingerprint(&self, path: &Path) -> Result<String> {
        let asset_error = |e: std::io::Error| Error::Asset {
            path: path.display().to_string(),
            message: e.to_string(),
        };

        let metadata = std::fs::metadata(path).map_err(asset_error)?;
        if !metadata.is_dir() {
            let contents = std::fs::read(path).map_err(asset_error)?;
            return Ok(hex::encode(Sha256::digest(&contents)));
        }

        let mut files = Vec::new();
        collect_files(path, path, &mut files).map_err(asset_error)?;
        files.sort();

        let mut digest = Sha256::new();
        for relative in &files {
            let contents = std::fs::read(path.join(relative)).map_err(asset_error)?;
            digest.update(relative.as_bytes());
            digest.update([0u8]);
            digest.update(Sha256::digest(&contents));
            digest.update([0u8]);
        }
        Ok(hex::encode(digest.finalize()))
    }
}

/// Relative, `/`-separated paths of every file under `dir`.
///
/// Symlinks to files are hashed through their target; symlinks to
/// directories are refused so a link loop cannot recurse forever.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        if file_type.is_symlink() && std::fs::metadata(&path)?.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("symlinked directory {} is not followed", path.display()),
            ));
        }
        if let Ok(relative) = path.strip_prefix(root) {
            let relative: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(relative.join("/"));
        }
    }
    Ok(())
}
