use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A file received with a buffered chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub stored_name: String,
}

impl UploadedFile {
    /// `origin` is `scheme://host` of the incoming request.
    pub fn download_url(&self, origin: &str) -> String {
        format!("{}/uploads/{}", origin.trim_end_matches('/'), self.stored_name)
    }

    /// Message text telling the model about the attachment.
    pub fn note(&self, origin: &str) -> String {
        format!(
            "File attached: {} (type: {}, size: {} bytes). Download: {}",
            self.original_name,
            self.mime_type,
            self.size,
            self.download_url(origin)
        )
    }
}

/// Append-only upload directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub async fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn store(
        &self,
        original_name: &str,
        mime_type: &str,
        contents: &[u8],
    ) -> io::Result<UploadedFile> {
        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_file_name(original_name));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(&stored_name))
            .await?;
        file.write_all(contents).await?;
        file.flush().await?;

        Ok(UploadedFile {
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            size: contents.len() as u64,
            stored_name,
        })
    }
}

/// Whitespace becomes `_`, as does anything that would need URL escaping.
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}
