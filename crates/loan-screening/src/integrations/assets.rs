use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::AssetConfig;

/// A document received at intake (national ID card scan, client picture).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    /// Used as the stored file name prefix, typically the client's first name.
    pub owner: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("document uploads are not enabled")]
    NotConfigured,
    #[error("uploaded file {file_name} is empty")]
    Empty { file_name: String },
    #[error("uploaded file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported document type {0}")]
    UnsupportedType(String),
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub trait AssetStore: Send + Sync + Debug {
    /// Persist the upload and return its public URL.
    fn store(&self, upload: &AssetUpload) -> Result<String, UploadError>;
    /// Local path of a previously stored asset.
    fn locate(&self, url: &str) -> Option<PathBuf>;
}

/// Writes assets below a directory that is served under `public_url`.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    directory: PathBuf,
    public_url: String,
    max_file_size: u64,
}

impl LocalAssetStore {
    pub fn new(
        directory: impl Into<PathBuf>,
        public_url: impl Into<String>,
        max_file_size: u64,
    ) -> Self {
        let mut public_url = public_url.into();
        if !public_url.ends_with('/') {
            public_url.push('/');
        }
        Self {
            directory: directory.into(),
            public_url,
            max_file_size,
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self::new(
            config.directory.clone(),
            config.public_url.clone(),
            config.max_file_size,
        )
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

/// `FIRSTNAME_<12 hex><ext>`
pub fn asset_name(owner: &str, extension: &str) -> String {
    let token = uuid::Uuid::now_v7().simple().to_string();
    let suffix = &token[token.len() - 12..];
    let prefix = owner
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect::<String>();
    let prefix = if prefix.is_empty() {
        "CLIENT".to_string()
    } else {
        prefix
    };
    format!("{prefix}_{suffix}{extension}")
}

const DOCUMENT_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "pdf"];

fn file_extension(upload: &AssetUpload) -> Option<String> {
    Path::new(&upload.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

fn declared_mime(upload: &AssetUpload) -> Option<mime::Mime> {
    upload.content_type.as_deref()?.parse().ok()
}

fn extension_for(upload: &AssetUpload) -> String {
    if let Some(ext) = file_extension(upload) {
        return format!(".{ext}");
    }
    match declared_mime(upload) {
        Some(declared) if declared.essence_str() == mime::IMAGE_JPEG.essence_str() => {
            ".jpg".to_string()
        }
        Some(declared) if declared.type_() == mime::IMAGE || declared.subtype() == mime::PDF => {
            format!(".{}", declared.subtype().as_str())
        }
        _ => String::new(),
    }
}

fn is_document(upload: &AssetUpload) -> bool {
    match declared_mime(upload) {
        Some(declared) => {
            declared.type_() == mime::IMAGE
                || declared.essence_str() == mime::APPLICATION_PDF.essence_str()
        }
        None => file_extension(upload)
            .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str())),
    }
}

impl AssetStore for LocalAssetStore {
    fn store(&self, upload: &AssetUpload) -> Result<String, UploadError> {
        let size = upload.bytes.len() as u64;
        if size == 0 {
            return Err(UploadError::Empty {
                file_name: upload.file_name.clone(),
            });
        }
        if size > self.max_file_size {
            return Err(UploadError::TooLarge {
                size,
                limit: self.max_file_size,
            });
        }
        if !is_document(upload) {
            return Err(UploadError::UnsupportedType(
                upload
                    .content_type
                    .clone()
                    .unwrap_or_else(|| upload.file_name.clone()),
            ));
        }

        fs::create_dir_all(&self.directory).map_err(|source| UploadError::Io {
            path: self.directory.clone(),
            source,
        })?;

        let name = asset_name(&upload.owner, &extension_for(upload));
        let path = self.directory.join(&name);
        fs::write(&path, &upload.bytes).map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), size, "asset stored");
        Ok(format!("{}{}", self.public_url, name))
    }

    fn locate(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(&self.public_url)?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        let path = self.directory.join(name);
        path.is_file().then_some(path)
    }
}
