//! Microsoft Graph drive item types
//!
//! Facet-based deserialization: an item is a folder, file, or deleted
//! tombstone depending on which facet objects are present.

use frame_traits::PhotoRecord;
use serde::Deserialize;

/// Graph drive item resource
///
/// See: https://learn.microsoft.com/graph/api/resources/driveitem
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Item creation time (RFC 3339)
    #[serde(default)]
    pub created_date_time: Option<String>,

    #[serde(default)]
    pub file: Option<FileFacet>,

    #[serde(default)]
    pub folder: Option<FolderFacet>,

    #[serde(default)]
    pub image: Option<ImageFacet>,

    #[serde(default)]
    pub photo: Option<PhotoFacet>,

    #[serde(default)]
    pub parent_reference: Option<ParentReference>,

    #[serde(default)]
    pub deleted: Option<DeletedFacet>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FolderFacet {}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageFacet {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoFacet {
    /// Camera capture time, preferred over item creation time.
    #[serde(default)]
    pub taken_date_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParentReference {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletedFacet {}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    pub fn is_image(&self) -> bool {
        self.file
            .as_ref()
            .and_then(|f| f.mime_type.as_deref())
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false)
    }

    /// Convert to the provider-agnostic photo record.
    pub fn into_photo_record(self) -> PhotoRecord {
        let created_at = self
            .photo
            .as_ref()
            .and_then(|p| p.taken_date_time.as_deref())
            .or(self.created_date_time.as_deref())
            .and_then(parse_timestamp_ms);
        let (width, height) = self
            .image
            .as_ref()
            .map(|i| (i.width, i.height))
            .unwrap_or((None, None));

        PhotoRecord {
            id: self.id,
            filename: self.name.unwrap_or_default(),
            parent_folder_id: self.parent_reference.and_then(|p| p.id),
            created_at,
            width,
            height,
        }
    }
}

pub fn parse_timestamp_ms(rfc3339: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Paged item listing (`/children` and `/delta` share the envelope).
#[derive(Debug, Deserialize)]
pub struct DriveItemPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,

    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,

    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_item_converts_with_taken_time_preferred() {
        let json = r#"{
            "id": "item1",
            "name": "beach.jpg",
            "createdDateTime": "2023-06-01T10:00:00Z",
            "file": {"mimeType": "image/jpeg"},
            "image": {"width": 4000, "height": 3000},
            "photo": {"takenDateTime": "2023-05-20T18:30:00Z"},
            "parentReference": {"id": "folder9"}
        }"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert!(item.is_image());
        assert!(!item.is_folder());

        let record = item.into_photo_record();
        assert_eq!(record.filename, "beach.jpg");
        assert_eq!(record.parent_folder_id.as_deref(), Some("folder9"));
        assert_eq!(
            record.created_at,
            parse_timestamp_ms("2023-05-20T18:30:00Z")
        );
        assert_eq!(record.width, Some(4000));
    }

    #[test]
    fn deleted_facet_detected() {
        let json = r#"{"id": "gone1", "deleted": {"state": "deleted"}}"#;
        let item: DriveItem = serde_json::from_str(json).unwrap();
        assert!(item.is_deleted());
        assert!(!item.is_image());
    }

    #[test]
    fn delta_page_envelope_parses_links() {
        let json = r#"{
            "value": [],
            "@odata.deltaLink": "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=abc"
        }"#;
        let page: DriveItemPage = serde_json::from_str(json).unwrap();
        assert!(page.next_link.is_none());
        assert!(page.delta_link.unwrap().contains("token=abc"));
    }
}
