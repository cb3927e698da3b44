use std::path::Path;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use shared_proto::ContentType;

use super::{send_empty, Backend};
use crate::error::{AppError, AppResult};

/// Object key inside the bucket: `images/…` or `files/…`, named by upload time.
pub fn object_path(kind: ContentType, extension: &str, millis: i64) -> String {
    format!("{}s/{}.{}", kind.as_str(), millis, extension)
}

pub fn mime_for(kind: ContentType) -> &'static str {
    match kind {
        ContentType::Image => "image/jpeg",
        _ => "application/octet-stream",
    }
}

impl Backend {
    /// Uploads a local file and returns its public URL.
    pub async fn upload_file(&self, path: &Path, kind: ContentType) -> AppResult<String> {
        if !kind.is_attachment() {
            return Err(AppError::validation("Only images and files can be uploaded"));
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::validation("File does not exist").with_details(format!("{}: {e}", path.display()))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin")
            .to_lowercase();
        let key = object_path(kind, &extension, Utc::now().timestamp_millis());

        let request = self
            .request(Method::POST, &self.config.storage_object_url(&key))
            .await
            .header(CONTENT_TYPE, mime_for(kind))
            .body(bytes);
        send_empty(request, "Failed to upload file").await?;

        tracing::info!(component = "storage", key = %key, "attachment uploaded");
        Ok(self.config.storage_public_url(&key))
    }
}
