//! Post-run artifact change set.

use chrono::{DateTime, Utc};
use relayrun_core::{FileChangeInfo, FileChangeRecord, FileItem};
use tracing::debug;

use crate::error::UploadError;
use crate::upload::UploadService;

/// Compares the artifacts known to the upload service against the run start.
pub struct FileChangeReconciler;

impl FileChangeReconciler {
    /// Keep items created or updated at or after `started_at`, classified
    /// as created or updated, in one change set.
    pub fn reconcile(files: &[FileItem], started_at: DateTime<Utc>) -> FileChangeInfo {
        let changes: Vec<FileChangeRecord> = files
            .iter()
            .filter(|item| item.touched_since(started_at))
            .map(|item| FileChangeRecord::from_item(item, item.change_type()))
            .collect();

        FileChangeInfo {
            file_change_list: Some(changes),
            err_list: None,
        }
    }

    /// List the service's artifacts and reconcile them.
    pub async fn run(
        upload: &dyn UploadService,
        started_at: DateTime<Utc>,
    ) -> Result<FileChangeInfo, UploadError> {
        let files = upload.list_files().await?;
        let info = Self::reconcile(&files, started_at);
        debug!(known = files.len(), changed = info.len(), "Reconciled artifacts");
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relayrun_core::FileChangeType;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn item(name: &str, created: i64, updated: i64) -> FileItem {
        FileItem {
            file_name: name.to_string(),
            file_type: "txt".to_string(),
            file_size: 1,
            file_uri: format!("uri/{}", name),
            file_url: format!("url/{}", name),
            upload_type: "agent".to_string(),
            create_time: at(created),
            update_time: at(updated),
        }
    }

    fn changes(info: &FileChangeInfo) -> Vec<(String, FileChangeType)> {
        info.file_change_list
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| (c.file_name.clone(), c.change_type))
            .collect()
    }

    #[test]
    fn test_created_after_start() {
        let info = FileChangeReconciler::reconcile(&[item("a", 100, 100)], at(50));
        assert_eq!(changes(&info), vec![("a".to_string(), FileChangeType::Create)]);
    }

    #[test]
    fn test_updated_after_start() {
        let info = FileChangeReconciler::reconcile(&[item("a", 100, 200)], at(150));
        assert_eq!(changes(&info), vec![("a".to_string(), FileChangeType::Update)]);
    }

    #[test]
    fn test_untouched_excluded() {
        let info = FileChangeReconciler::reconcile(&[item("a", 10, 20)], at(50));
        assert!(info.is_empty());
    }

    #[test]
    fn test_start_boundary_is_inclusive() {
        let info = FileChangeReconciler::reconcile(
            &[item("a", 50, 50), item("b", 10, 49), item("c", 10, 60)],
            at(50),
        );
        assert_eq!(
            changes(&info),
            vec![
                ("a".to_string(), FileChangeType::Create),
                ("c".to_string(), FileChangeType::Update),
            ]
        );
    }
}
