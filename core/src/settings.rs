use serde::{Deserialize, Serialize};

/// Governing configuration for image bookkeeping.
///
/// The serde names mirror the host plugin's settings JSON so the struct
/// round-trips the host's stored configuration unchanged; missing fields
/// take defaults and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upload every newly added image immediately.
    #[serde(rename = "isAutoUpload")]
    pub auto_upload: bool,

    /// Remove the local copy once an upload has been recorded.
    #[serde(rename = "isDeleteTemp")]
    pub delete_after_upload: bool,

    /// Template for the per-document asset folder, resolved relative to the
    /// document's directory.
    #[serde(rename = "tempFolderPath")]
    pub folder_template: String,

    /// Template for generated file names. Carried for the host's settings
    /// round-trip; the manager itself preserves original filenames.
    #[serde(rename = "tempFileFormat")]
    pub file_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_upload: false,
            delete_after_upload: false,
            folder_template: "_assets.{{filename}}".to_string(),
            file_template: "{{filename}}-{{random}}".to_string(),
        }
    }
}
