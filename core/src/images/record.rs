use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Horizontal alignment recorded for an embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

impl Align {
    pub fn as_str(&self) -> &'static str {
        match self {
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
        }
    }
}

/// The persisted state of one managed image.
///
/// `local_path` doubles as the record's key in the owning manager's map.
/// `is_uploaded` implies a non-empty `remote_path`; sidecars that violate
/// this are repaired on load rather than trusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageRecord {
    /// Vault-relative path of the on-disk copy. After an upload with
    /// configured local deletion this keeps pointing at the removed file,
    /// so a later download can restore it in place.
    pub local_path: String,

    /// URL assigned by the last successful upload; empty if never uploaded.
    pub remote_path: String,

    pub is_uploaded: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    /// Size in bytes at the time the local copy was last written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<i64>,

    /// Epoch milliseconds; bumped on upload and download.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modify_time: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<Align>,
}

impl ImageRecord {
    /// A fresh record for a newly copied image.
    pub fn new(
        local_path: impl Into<String>,
        original_name: impl Into<String>,
        size: Option<u64>,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        ImageRecord {
            local_path: local_path.into(),
            original_name: Some(original_name.into()),
            size,
            create_time: Some(now),
            modify_time: Some(now),
            ..Default::default()
        }
    }

    /// Records a completed upload.
    pub fn mark_uploaded(&mut self, url: impl Into<String>) {
        self.remote_path = url.into();
        self.is_uploaded = true;
        self.touch();
    }

    /// Records a completed download to `local_path`.
    pub fn mark_downloaded(&mut self, local_path: impl Into<String>) {
        self.local_path = local_path.into();
        self.touch();
    }

    fn touch(&mut self) {
        self.modify_time = Some(Utc::now().timestamp_millis());
    }

    /// Repairs a record parsed from a sidecar: adopts the map key as the
    /// local path when missing, and demotes an uploaded flag that has no
    /// remote URL to back it.
    pub(crate) fn normalize(&mut self, key: &str) {
        if self.local_path.is_empty() && !key.is_empty() {
            self.local_path = key.to_string();
        }
        if self.is_uploaded && self.remote_path.is_empty() {
            warn!(
                local_path = %self.local_path,
                "record flagged uploaded without a remote URL; clearing flag"
            );
            self.is_uploaded = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_host_field_names() {
        let mut record = ImageRecord::new("notes/_assets.a/img.png", "img.png", Some(9));
        record.align = Some(Align::Center);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"localPath\""));
        assert!(json.contains("\"isUploaded\":false"));
        assert!(json.contains("\"originalName\":\"img.png\""));
        assert!(json.contains("\"align\":\"center\""));
        // Absent optionals are omitted entirely.
        assert!(!json.contains("\"width\""));
    }

    #[test]
    fn parses_minimal_record() {
        let record: ImageRecord =
            serde_json::from_str(r#"{ "localPath": "a/img.png" }"#).unwrap();
        assert_eq!(record.local_path, "a/img.png");
        assert!(!record.is_uploaded);
        assert_eq!(record.remote_path, "");
        assert_eq!(record.size, None);
        assert_eq!(record.align, None);
    }

    #[test]
    fn round_trip() {
        let mut record = ImageRecord::new("a/img.png", "img.png", Some(42));
        record.mark_uploaded("https://img.example/img.png");
        let json = serde_json::to_string_pretty(&record).unwrap();
        let back: ImageRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn mark_uploaded_sets_state() {
        let mut record = ImageRecord::new("a/img.png", "img.png", None);
        let created = record.modify_time;
        record.mark_uploaded("https://img.example/img.png");
        assert!(record.is_uploaded);
        assert_eq!(record.remote_path, "https://img.example/img.png");
        assert!(record.modify_time >= created);
    }

    #[test]
    fn normalize_repairs_parsed_records() {
        let mut record: ImageRecord =
            serde_json::from_str(r#"{ "isUploaded": true }"#).unwrap();
        record.normalize("a/img.png");
        assert_eq!(record.local_path, "a/img.png");
        // Uploaded without a remote URL is contradictory; the flag loses.
        assert!(!record.is_uploaded);

        let mut uploaded: ImageRecord = serde_json::from_str(
            r#"{ "localPath": "a/img.png", "remotePath": "https://x/y.png", "isUploaded": true }"#,
        )
        .unwrap();
        uploaded.normalize("a/img.png");
        assert!(uploaded.is_uploaded);
    }
}
