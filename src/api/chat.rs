use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::error::{Error, Result};
use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// Longest accepted question, in characters.
const MAX_CHAT_MESSAGE_CHARS: usize = 2000;

/// POST /api/chat - Answer a question from the indexed documents
pub async fn chat(
    State(state): State<AppState>,
    req: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let Json(req) = req.map_err(|rejection| {
        Error::Validation(format!("Invalid request body: {}", rejection.body_text()))
    })?;
    let message = req.message.unwrap_or_default();
    let message = message.trim();
    if message.chars().count() > MAX_CHAT_MESSAGE_CHARS {
        return Err(Error::Validation(format!(
            "Message is longer than {MAX_CHAT_MESSAGE_CHARS} characters"
        )));
    }

    let _permit = state
        .chat_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::Generation("Chat service at capacity".into()))?;

    let answer = state.answers.answer(message).await?;
    Ok(Json(ChatResponse {
        message: answer.text,
        docs: answer.sources,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{router, testing};
    use crate::index::IndexRecord;
    use crate::llm::Embedder;
    use crate::rag::FALLBACK_ANSWER;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn seed(state: &AppState, text: &str) {
        let vector = testing::HashEmbedder.embed(text).await.unwrap();
        state
            .index
            .upsert(vec![IndexRecord {
                id: Uuid::new_v4(),
                vector,
                text: text.into(),
                metadata: serde_json::json!({
                    "source": "lease.pdf",
                    "page_number": 2,
                    "embedding_model": "hash-8",
                }),
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_message_is_400() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(testing::state(dir.path(), Some("unused")));
        let resp = app.oneshot(chat_request(serde_json::json!({}))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Missing message field in body.");
    }

    #[tokio::test]
    async fn test_empty_index_answers_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(testing::state(dir.path(), Some("unused")));
        let resp = app
            .oneshot(chat_request(serde_json::json!({ "message": "What is the rent?" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["message"], FALLBACK_ANSWER);
        assert_eq!(body["docs"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_answer_includes_source_docs() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path(), Some("Rent is 1200 per month."));
        seed(&state, "The monthly rent is 1200.").await;

        let resp = router(state)
            .oneshot(chat_request(serde_json::json!({ "message": "What is the rent?" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["message"], "Rent is 1200 per month.");
        assert_eq!(body["docs"][0]["pageContent"], "The monthly rent is 1200.");
        assert_eq!(body["docs"][0]["metadata"]["source"], "lease.pdf");
    }

    #[tokio::test]
    async fn test_generator_failure_is_single_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path(), None);
        seed(&state, "The monthly rent is 1200.").await;

        let resp = router(state)
            .oneshot(chat_request(serde_json::json!({ "message": "What is the rent?" })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert!(body["error"].as_str().unwrap().contains("503"));
        assert!(body.get("message").is_none());
    }

    #[tokio::test]
    async fn test_malformed_body_gets_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path(), Some("unused"));

        let invalid_json = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{\"message\": "))
            .unwrap();
        let resp = router(state.clone()).oneshot(invalid_json).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].as_str().unwrap().starts_with("Invalid request body"));

        let wrong_type = chat_request(serde_json::json!({ "message": 42 }));
        let resp = router(state.clone()).oneshot(wrong_type).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].is_string());

        let no_content_type = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .body(Body::from(r#"{"message":"hi"}"#))
            .unwrap();
        let resp = router(state).oneshot(no_content_type).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_overlong_message_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(testing::state(dir.path(), Some("unused")));
        let message = "é".repeat(MAX_CHAT_MESSAGE_CHARS + 1);
        let resp = app
            .oneshot(chat_request(serde_json::json!({ "message": message })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(resp).await["error"].as_str().unwrap().contains("2000"));
    }

    #[tokio::test]
    async fn test_message_at_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(testing::state(dir.path(), Some("unused")));
        let message = "é".repeat(MAX_CHAT_MESSAGE_CHARS);
        let resp = app
            .oneshot(chat_request(serde_json::json!({ "message": message })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
