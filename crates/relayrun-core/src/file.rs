//! Artifacts known to the upload service and the change records derived
//! from them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An artifact as listed by the upload service. Timestamps travel as
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileItem {
    pub file_name: String,
    /// Logical type reported by the storage backend.
    pub file_type: String,
    pub file_size: u64,
    pub file_uri: String,
    pub file_url: String,
    pub upload_type: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub create_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub update_time: DateTime<Utc>,
}

impl FileItem {
    /// True if the item was created or updated at or after `since`.
    pub fn touched_since(&self, since: DateTime<Utc>) -> bool {
        self.create_time >= since || self.update_time >= since
    }

    /// Classify a touched item: a differing update time means it existed before.
    pub fn change_type(&self) -> FileChangeType {
        if self.create_time != self.update_time {
            FileChangeType::Update
        } else {
            FileChangeType::Create
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Dir,
    #[default]
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeType {
    Create,
    Delete,
    Update,
}

/// One reconciled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeRecord {
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default)]
    pub file_path: String,
    pub file_name: String,
    pub change_type: FileChangeType,
    pub uri: String,
    pub url: String,
}

impl FileChangeRecord {
    /// Build the record for a listed item.
    pub fn from_item(item: &FileItem, change_type: FileChangeType) -> Self {
        Self {
            file_type: FileType::File,
            file_path: String::new(),
            file_name: item.file_name.clone(),
            change_type,
            uri: item.file_uri.clone(),
            url: item.file_url.clone(),
        }
    }
}

/// The single change set emitted per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_change_list: Option<Vec<FileChangeRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_list: Option<Vec<ErrData>>,
}

impl FileChangeInfo {
    /// Number of reconciled artifacts.
    pub fn len(&self) -> usize {
        self.file_change_list.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrData {
    pub data: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(create_ms: i64, update_ms: i64) -> FileItem {
        FileItem {
            file_name: "report.md".to_string(),
            file_type: "markdown".to_string(),
            file_size: 12,
            file_uri: "tos://bucket/report.md".to_string(),
            file_url: "https://cdn.example.com/report.md".to_string(),
            upload_type: "agent".to_string(),
            create_time: Utc.timestamp_millis_opt(create_ms).unwrap(),
            update_time: Utc.timestamp_millis_opt(update_ms).unwrap(),
        }
    }

    #[test]
    fn test_file_item_millisecond_timestamps() {
        let json = r#"{"file_name":"a.txt","file_type":"txt","file_size":1,"file_uri":"u","file_url":"l","upload_type":"agent","create_time":1700000000000,"update_time":1700000005000}"#;
        let parsed: FileItem = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.create_time.timestamp(), 1_700_000_000);
        assert_eq!(parsed.change_type(), FileChangeType::Update);
    }

    #[test]
    fn test_touched_since_is_inclusive() {
        let since = Utc.timestamp_millis_opt(100).unwrap();
        assert!(item(100, 100).touched_since(since));
        assert!(item(10, 100).touched_since(since));
        assert!(!item(10, 99).touched_since(since));
    }

    #[test]
    fn test_change_record_shape() {
        let record = FileChangeRecord::from_item(&item(1, 1), FileChangeType::Create);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["file_type"], "file");
        assert_eq!(value["change_type"], "create");
        assert_eq!(value["uri"], "tos://bucket/report.md");
    }
}
