// ============================================================================
// UPLOAD BRIDGE: boundary to durable blob storage
// ============================================================================

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UploadError;
use crate::io::ImageBlob;

pub const ALLOWED_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadCategory {
    #[default]
    Posts,
    Profile,
    BackgroundImage,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Posts => "posts",
            UploadCategory::Profile => "profile",
            UploadCategory::BackgroundImage => "background_image",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "posts" | "uploads" => Some(UploadCategory::Posts),
            "profile" | "avatar" => Some(UploadCategory::Profile),
            "background_image" | "background" | "bg" => Some(UploadCategory::BackgroundImage),
            _ => None,
        }
    }
}

/// Body of the presign request sent before the actual PUT.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub upload_type: UploadCategory,
}

impl UploadRequest {
    pub fn for_blob(blob: &ImageBlob, category: UploadCategory) -> Self {
        Self {
            filename: blob.filename.clone(),
            content_type: blob.content_type().to_string(),
            file_size: blob.len() as u64,
            upload_type: category,
        }
    }
}

/// What the storage side answers: where to PUT, and where the object will be served.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub presigned_url: String,
    pub public_url: String,
    pub key: String,
}

/// Lower-cased extension including the dot, `""` when there is none.
pub fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => format!(".{}", ext.to_ascii_lowercase()),
        None => String::new(),
    }
}

/// Storage key for an upload. Profile pictures and banners are keyed by
/// owner so a new one replaces the old; everything else gets a fresh UUID.
pub fn object_key(filename: &str, category: UploadCategory, owner: Option<&str>) -> Result<String, UploadError> {
    let ext = file_extension(filename);
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(UploadError::InvalidFileType(filename.to_string()));
    }
    let key = match (category, owner) {
        (UploadCategory::Profile, Some(owner)) => format!("profiles/{}{}", owner, ext),
        (UploadCategory::BackgroundImage, Some(owner)) => format!("bg/{}{}", owner, ext),
        _ => format!("uploads/{}{}", Uuid::new_v4(), ext),
    };
    Ok(key)
}

/// Stores an encoded blob and returns its public URL.
pub trait UploadBridge {
    fn upload(&self, blob: &ImageBlob, category: UploadCategory) -> Result<String, UploadError>;
}

/// Bridge backed by a local directory laid out like the object store.
/// Each object gets a `<key>.json` sidecar recording the request and response.
pub struct DirectoryBridge {
    root: PathBuf,
    public_base: String,
    owner: Option<String>,
}

impl DirectoryBridge {
    pub fn new(root: impl Into<PathBuf>, public_base: &str) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = Some(owner.to_string());
        self
    }
}

#[derive(Serialize)]
struct Sidecar<'a> {
    request: &'a UploadRequest,
    response: &'a PresignResponse,
}

impl UploadBridge for DirectoryBridge {
    fn upload(&self, blob: &ImageBlob, category: UploadCategory) -> Result<String, UploadError> {
        if blob.is_empty() {
            return Err(UploadError::Rejected(format!("{} is empty", blob.filename)));
        }
        let request = UploadRequest::for_blob(blob, category);
        let key = object_key(&request.filename, category, self.owner.as_deref())?;
        let path = self.root.join(&key);
        let response = PresignResponse {
            presigned_url: format!("file://{}", path.display()),
            public_url: format!("{}/{}", self.public_base, key),
            key,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &blob.data)?;

        let sidecar = serde_json::to_string_pretty(&Sidecar { request: &request, response: &response })?;
        let mut sidecar_path = path.into_os_string();
        sidecar_path.push(".json");
        std::fs::write(sidecar_path, sidecar)?;

        log::info!("stored {} ({} bytes) at {}", request.filename, request.file_size, response.key);
        Ok(response.public_url)
    }
}
