use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An uploaded file awaiting (or past) ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub file_name: String,
    pub source_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// One page (or other logical unit) of text extracted by a loader.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    /// 1-based page number, when the format has pages
    pub page_number: Option<u32>,
    pub source: String,
}

/// Metadata carried from a segment into every chunk cut from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub page_number: Option<u32>,
    pub source: String,
    /// Character offset of the chunk start within its segment
    pub start_offset: usize,
    /// Character offset one past the chunk end within its segment
    pub end_offset: usize,
}

/// A bounded slice of a document's text, the retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document_id: Uuid,
    /// Position within the document, across all pages
    pub sequence_index: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Work item enqueued by the upload boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub document_id: Uuid,
    pub file_name: String,
    /// Public URL for the frontend
    pub file_url: String,
    pub file_type: String,
    pub file_size: u64,
    /// Path the worker loads from
    pub file_path: String,
    pub file_created_at: DateTime<Utc>,
    pub file_updated_at: DateTime<Utc>,
}

impl FilePayload {
    pub fn document(&self) -> Document {
        Document {
            id: self.document_id,
            file_name: self.file_name.clone(),
            source_path: self.file_path.clone(),
            mime_type: self.file_type.clone(),
            size_bytes: self.file_size,
            created_at: self.file_created_at,
        }
    }
}

/// A retrieved chunk returned to the caller for citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDoc {
    pub page_content: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

/// Generated answer plus the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceDoc>,
}

/// Chat request
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Chat response
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub docs: Vec<SourceDoc>,
}

/// Upload response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_url: String,
    pub queue: String,
    pub job_id: Uuid,
    pub document_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_payload_uses_camel_case_keys() {
        let now = Utc::now();
        let payload = FilePayload {
            document_id: Uuid::nil(),
            file_name: "a.pdf".into(),
            file_url: "/uploads/a.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 10,
            file_path: "/data/uploads/a.pdf".into(),
            file_created_at: now,
            file_updated_at: now,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["filePath"], "/data/uploads/a.pdf");
        assert_eq!(json["fileType"], "application/pdf");
        assert!(json.get("fileCreatedAt").is_some());
    }

    #[test]
    fn test_payload_document_copies_identity() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let payload = FilePayload {
            document_id: id,
            file_name: "b.pdf".into(),
            file_url: "/uploads/b.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 42,
            file_path: "/tmp/b.pdf".into(),
            file_created_at: now,
            file_updated_at: now,
        };
        let doc = payload.document();
        assert_eq!(doc.id, id);
        assert_eq!(doc.source_path, "/tmp/b.pdf");
        assert_eq!(doc.size_bytes, 42);
    }

    #[test]
    fn test_chat_request_without_message_parses() {
        let req: ChatRequest = serde_json::from_str("{}").unwrap();
        assert!(req.message.is_none());
    }
}
