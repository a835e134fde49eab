//! Google Drive API response types
//!
//! Data structures for deserializing Google Drive API v3 responses.

use frame_traits::PhotoRecord;
use serde::Deserialize;

/// Folder MIME type on Drive
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Google Drive API file resource
///
/// See: https://developers.google.com/drive/api/v3/reference/files#resource
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,

    pub name: String,

    pub mime_type: String,

    /// Creation time (RFC 3339)
    #[serde(default)]
    pub created_time: Option<String>,

    /// Parent folder IDs
    #[serde(default)]
    pub parents: Vec<String>,

    /// Whether file is trashed
    #[serde(default)]
    pub trashed: bool,

    /// Image metadata (present for image files)
    #[serde(default)]
    pub image_media_metadata: Option<ImageMediaMetadata>,
}

/// Pixel dimensions reported by Drive for image content
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMediaMetadata {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Convert to the provider-agnostic photo record.
    pub fn into_photo_record(self) -> PhotoRecord {
        let created_at = self.created_time.as_deref().and_then(parse_timestamp_ms);
        let (width, height) = self
            .image_media_metadata
            .as_ref()
            .map(|m| (m.width, m.height))
            .unwrap_or((None, None));

        PhotoRecord {
            id: self.id,
            filename: self.name,
            parent_folder_id: self.parents.into_iter().next(),
            created_at,
            width,
            height,
        }
    }
}

/// Parse an RFC 3339 timestamp to epoch milliseconds.
pub fn parse_timestamp_ms(rfc3339: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Google Drive API files.list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesListResponse {
    #[serde(default)]
    pub files: Vec<DriveFile>,

    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Google Drive API changes.list response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesListResponse {
    #[serde(default)]
    pub changes: Vec<Change>,

    #[serde(default)]
    pub next_page_token: Option<String>,

    #[serde(default)]
    pub new_start_page_token: Option<String>,
}

/// Google Drive API change resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(default)]
    pub removed: bool,

    #[serde(default)]
    pub file: Option<DriveFile>,

    #[serde(default)]
    pub file_id: Option<String>,
}

/// Google Drive API changes.getStartPageToken response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPageTokenResponse {
    pub start_page_token: String,
}
