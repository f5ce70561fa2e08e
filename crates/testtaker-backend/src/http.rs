//! REST implementation of the attempt backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use testtaker_core::error::BackendError;
use testtaker_core::model::AnswerPayload;
use testtaker_core::traits::{
    AttemptBackend, AttemptResult, AttemptStatusSnapshot, QuestionView, SaveAck, StartedAttempt,
};

use crate::error::{check_status, from_transport, ClientError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Talks to a test-taking REST API with JSON bodies.
pub struct HttpBackend {
    base_url: Url,
    api_token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepRequest<'a> {
    current_question_number: u32,
    answer: &'a AnswerPayload,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base".into()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: parsed,
            api_token: api_token.filter(|t| !t.is_empty()),
            timeout_secs: timeout.as_secs(),
            client,
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Network(format!("invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = self
            .authorize(request)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| from_transport(&e, self.timeout_secs))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse response: {e}")))
    }

    async fn step(
        &self,
        attempt_id: &str,
        direction: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError> {
        let url = self.url(&["attempts", attempt_id, direction])?;
        let body = StepRequest {
            current_question_number,
            answer,
        };
        self.send_json(self.client.post(url).json(&body)).await
    }
}

#[async_trait]
impl AttemptBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn start_attempt(&self, test_id: &str) -> Result<StartedAttempt, BackendError> {
        let url = self.url(&["tests", test_id, "attempts"])?;
        self.send_json(self.client.post(url)).await
    }

    #[instrument(skip(self))]
    async fn get_question(
        &self,
        attempt_id: &str,
        question_number: u32,
    ) -> Result<QuestionView, BackendError> {
        let number = question_number.to_string();
        let url = self.url(&["attempts", attempt_id, "questions", &number])?;
        self.send_json(self.client.get(url)).await
    }

    #[instrument(skip(self, answer), fields(question_id = answer.question_id))]
    async fn save_answer(
        &self,
        attempt_id: &str,
        answer: &AnswerPayload,
    ) -> Result<SaveAck, BackendError> {
        let url = self.url(&["attempts", attempt_id, "answers"])?;
        let response = self.send(self.client.put(url).json(answer)).await?;
        let body = response
            .text()
            .await
            .map_err(|e| from_transport(&e, self.timeout_secs))?;
        // Some deployments answer 204 with no body.
        if body.trim().is_empty() {
            return Ok(SaveAck {
                question_id: answer.question_id,
                saved_at: None,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("failed to parse response: {e}")))
    }

    #[instrument(skip(self, answer))]
    async fn next_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError> {
        self.step(attempt_id, "next", current_question_number, answer)
            .await
    }

    #[instrument(skip(self, answer))]
    async fn previous_question(
        &self,
        attempt_id: &str,
        current_question_number: u32,
        answer: &AnswerPayload,
    ) -> Result<QuestionView, BackendError> {
        self.step(attempt_id, "previous", current_question_number, answer)
            .await
    }

    #[instrument(skip(self))]
    async fn complete_attempt(&self, attempt_id: &str) -> Result<AttemptResult, BackendError> {
        let url = self.url(&["attempts", attempt_id, "complete"])?;
        self.send_json(self.client.post(url)).await
    }

    #[instrument(skip(self))]
    async fn attempt_status(
        &self,
        attempt_id: &str,
    ) -> Result<AttemptStatusSnapshot, BackendError> {
        let url = self.url(&["attempts", attempt_id])?;
        self.send_json(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testtaker_core::traits::RemoteStatus;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer, token: Option<&str>) -> HttpBackend {
        HttpBackend::new(
            &server.uri(),
            token.map(String::from),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn question_json(ordinal: u32) -> serde_json::Value {
        serde_json::json!({
            "id": ordinal * 10,
            "ordinal": ordinal,
            "type": "SINGLE_CHOICE",
            "text": format!("Question {ordinal}"),
            "options": [{"id": 1, "text": "yes"}, {"id": 2, "text": "no"}]
        })
    }

    fn answer() -> AnswerPayload {
        AnswerPayload {
            question_id: 10,
            selected_option_ids: vec![2],
            answer_text: String::new(),
        }
    }

    #[tokio::test]
    async fn start_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tests/rust-101/attempts"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "attemptId": "att-9",
                "question": question_json(1),
                "currentQuestionNumber": 1,
                "totalQuestions": 3,
                "durationMinutes": 10
            })))
            .mount(&server)
            .await;

        let started = backend(&server, Some("secret"))
            .start_attempt("rust-101")
            .await
            .unwrap();
        assert_eq!(started.attempt_id, "att-9");
        assert_eq!(started.total_questions, 3);
        assert_eq!(started.initial_remaining_seconds(), Some(600));
    }

    #[tokio::test]
    async fn next_carries_current_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/attempts/att-9/next"))
            .and(body_json(serde_json::json!({
                "currentQuestionNumber": 1,
                "answer": {"questionId": 10, "selectedOptionIds": [2], "answerText": ""}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "question": question_json(2),
                "currentQuestionNumber": 2
            })))
            .mount(&server)
            .await;

        let view = backend(&server, None)
            .next_question("att-9", 1, &answer())
            .await
            .unwrap();
        assert_eq!(view.current_question_number, 2);
        assert!(view.current_answer.is_none());
    }

    #[tokio::test]
    async fn save_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/attempts/att-9/answers"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let ack = backend(&server, None)
            .save_answer("att-9", &answer())
            .await
            .unwrap();
        assert_eq!(ack.question_id, 10);
        assert!(ack.saved_at.is_none());
    }

    #[tokio::test]
    async fn closed_test_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tests/closed/attempts"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(serde_json::json!({"message": "test is closed"})),
            )
            .mount(&server)
            .await;

        let err = backend(&server, None)
            .start_attempt("closed")
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Rejected("test is closed".into()));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/attempts/att-9/complete"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = backend(&server, None)
            .complete_attempt("att-9")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::RateLimited {
                retry_after_ms: 3000
            }
        );
    }

    #[tokio::test]
    async fn status_and_question_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/attempts/att-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "attemptId": "att-9",
                "status": "IN_PROGRESS",
                "currentQuestionNumber": 2,
                "totalQuestions": 3,
                "timeRemainingSeconds": 120,
                "answeredQuestions": [1]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/attempts/att-9/questions/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "question": question_json(2),
                "currentQuestionNumber": 2,
                "currentAnswer": {"questionId": 20, "selectedOptionIds": [1]}
            })))
            .mount(&server)
            .await;

        let backend = backend(&server, None);
        let status = backend.attempt_status("att-9").await.unwrap();
        assert_eq!(status.status, RemoteStatus::InProgress);
        assert_eq!(status.answered_questions, vec![1]);

        let view = backend.get_question("att-9", 2).await.unwrap();
        assert_eq!(view.current_answer.unwrap().selected_option_ids, vec![1]);
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/attempts/att-9/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = backend(&server, None)
            .complete_attempt("att-9")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        let backend =
            HttpBackend::new("http://127.0.0.1:9", None, Duration::from_secs(2)).unwrap();
        let err = backend.attempt_status("att-9").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpBackend::new("not a url", None, Duration::from_secs(1)),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
        assert!(HttpBackend::new("mailto:someone@example.com", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn base_path_is_kept() {
        let backend =
            HttpBackend::new("https://exams.example.com/api/", None, Duration::from_secs(1))
                .unwrap();
        let url = backend.url(&["tests", "a b", "attempts"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://exams.example.com/api/tests/a%20b/attempts"
        );
    }
}
