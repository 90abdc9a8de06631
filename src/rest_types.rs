use std::{fmt::Display, time::SystemTime};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::serde_utils;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartUploadUrlsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    pub starting_part_number: u32,
    pub number_of_parts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartUploadUrlsResponse {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub urls: Vec<Url>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratePagesImageType {
    StandardColor,
    StandardGrayscale,
    HighQualityColor,
    HighQualityGrayscale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPdfOptions {
    pub generate_pages: bool,
    pub generate_pages_image_type: GeneratePagesImageType,
    pub generate_text: bool,
    pub keep_pdf_after_import: bool,
}

impl Default for ImportPdfOptions {
    fn default() -> Self {
        Self {
            generate_pages: true,
            generate_pages_image_type: GeneratePagesImageType::HighQualityColor,
            generate_text: true,
            keep_pdf_after_import: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportUploadedPartsRequest {
    pub upload_id: String,
    #[serde(rename = "partETags")]
    pub part_etags: Vec<String>,
    pub name: String,
    pub auto_rename: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_options: Option<ImportPdfOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TaskStatus {
    #[serde(rename = "NotStarted", alias = "Queued")]
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "Queued"),
            TaskStatus::InProgress => write!(f, "In progress"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Failed => write!(f, "Failed"),
            TaskStatus::Cancelled => write!(f, "Cancelled"),
            TaskStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub entry_id: Option<i64>,
}

/// Error detail reported by the repository for a failed task or request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemDetails {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub error_code: Option<i64>,
}

impl Display for ProblemDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = self.title.as_deref().unwrap_or("Unknown error");
        match (&self.detail, self.error_code) {
            (Some(detail), Some(code)) => write!(f, "{} ({}): {}", title, code, detail),
            (Some(detail), None) => write!(f, "{}: {}", title, detail),
            (None, Some(code)) => write!(f, "{} ({})", title, code),
            (None, None) => write!(f, "{}", title),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub id: String,
    pub task_type: Option<String>,
    pub status: TaskStatus,
    pub percent_complete: Option<i32>,
    #[serde(default, deserialize_with = "serde_utils::deserialize_optional_rfc3339")]
    pub start_time: Option<SystemTime>,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default, deserialize_with = "serde_utils::null_as_default")]
    pub errors: Vec<ProblemDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskCollectionResponse {
    #[serde(default, deserialize_with = "serde_utils::null_as_default")]
    pub value: Vec<TaskProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_batch_request_omits_upload_id() {
        let request = CreateMultipartUploadUrlsRequest {
            upload_id: None,
            starting_part_number: 1,
            number_of_parts: 10,
            file_name: Some("sample.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "startingPartNumber": 1,
                "numberOfParts": 10,
                "fileName": "sample.pdf",
                "mimeType": "application/pdf"
            })
        );
    }

    #[test]
    fn finalize_request_uses_part_etags_key() {
        let request = StartImportUploadedPartsRequest {
            upload_id: "u-1".to_string(),
            part_etags: vec!["a".to_string(), "b".to_string()],
            name: "sample.pdf".to_string(),
            auto_rename: true,
            pdf_options: Some(ImportPdfOptions::default()),
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["partETags"], json!(["a", "b"]));
        assert_eq!(value["autoRename"], json!(true));
        assert_eq!(
            value["pdfOptions"],
            json!({
                "generatePages": true,
                "generatePagesImageType": "HighQualityColor",
                "generateText": true,
                "keepPdfAfterImport": true
            })
        );
    }

    #[test]
    fn task_progress_parses_statuses() {
        let body = json!({
            "value": [
                {"id": "t1", "status": "NotStarted"},
                {"id": "t2", "status": "InProgress", "percentComplete": 40},
                {"id": "t3", "status": "Completed", "result": {"entryId": 42}},
                {"id": "t4", "status": "Failed", "errors": [{"title": "Bad part", "errorCode": 7}]},
                {"id": "t5", "status": "Paused"}
            ]
        });

        let response: TaskCollectionResponse = serde_json::from_value(body).unwrap();
        let statuses: Vec<_> = response.value.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Queued,
                TaskStatus::InProgress,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Unknown,
            ]
        );
        assert_eq!(response.value[2].result.as_ref().unwrap().entry_id, Some(42));
        assert_eq!(response.value[3].errors[0].to_string(), "Bad part (7)");
    }

    #[test]
    fn completed_task_with_null_errors_parses() {
        let body = json!({
            "value": [{
                "id": "t1",
                "status": "Completed",
                "result": {"entryId": 5},
                "errors": null
            }]
        });

        let response: TaskCollectionResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.value[0].status, TaskStatus::Completed);
        assert!(response.value[0].errors.is_empty());
    }

    #[test]
    fn start_time_accepts_utc_offset() {
        let body = json!({
            "value": [{
                "id": "t1",
                "status": "InProgress",
                "startTime": "2024-03-05T18:33:46.1234567-05:00"
            }]
        });

        let response: TaskCollectionResponse = serde_json::from_value(body).unwrap();
        let expected = std::time::UNIX_EPOCH + std::time::Duration::new(1709681626, 123_456_700);
        assert_eq!(response.value[0].start_time, Some(expected));
    }
}
