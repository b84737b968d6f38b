//! HTTP binding of [`BoardApi`] against the authority's `/api` routes.

use super::{AllowedTransitions, ApiResult, BoardApi};
use crate::config::SyncConfig;
use crate::error::ApiError;
use crate::types::{
    ActivityPage, Board, BoardActivity, BoardId, BoardPatch, ClarificationReceipt, Column,
    ColumnId, ColumnPatch, Execution, ExecutionId, MoveTask, NewBoard, NewColumn, NewTask,
    NewTransition, NewWorkflow, StartExecution, Task, TaskId, TaskPatch, TaskRecord, Transition,
    TransitionId, TransitionPatch, WorkflowDefinition, WorkflowId, WorkflowPatch,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode {
                message: err.to_string(),
            }
        } else {
            ApiError::network(err.to_string())
        }
    }
}

/// Pull the code and message out of an error body.
///
/// The authority wraps errors as `{"detail": ...}` where `detail` is a plain
/// string, an object carrying `error` and `message`, or a list of validation
/// entries each carrying `msg`. Anything else falls back to the raw body.
fn extract_error_detail(body: &str) -> (Option<String>, String) {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, body.to_string());
    };

    match json.get("detail") {
        Some(serde_json::Value::String(message)) => (None, message.clone()),
        Some(serde_json::Value::Object(detail)) => {
            let code = detail
                .get("error")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let message = detail
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| code.clone())
                .unwrap_or_else(|| body.to_string());
            (code, message)
        }
        Some(serde_json::Value::Array(entries)) => {
            let messages: Vec<&str> = entries
                .iter()
                .filter_map(|e| e.get("msg").and_then(|m| m.as_str()))
                .collect();
            if messages.is_empty() {
                (None, body.to_string())
            } else {
                (None, messages.join("; "))
            }
        }
        _ => (None, body.to_string()),
    }
}

/// Map an HTTP response to an `ApiError` when the status is not a success
async fn check_response(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = extract_error_detail(&body);
    Err(ApiError::Status {
        status: status.as_u16(),
        code,
        message,
    })
}

/// Client for the board authority's REST API
#[derive(Debug, Clone)]
pub struct HttpBoardApi {
    client: Client,
    base_url: String,
}

impl HttpBoardApi {
    /// Create a client for the authority at `base_url` (e.g. `http://localhost:8000`)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest::Client`
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create a client from configuration, applying the request timeout
    pub fn from_config(config: &SyncConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.url(path);
        debug!(%method, %url, "authority request");
        self.client.request(method, url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let response = self.request(Method::GET, path).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> ApiResult<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(method, path).json(body).send().await?;
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, path: &str) -> ApiResult<()> {
        let response = self.request(Method::DELETE, path).send().await?;
        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BoardApi for HttpBoardApi {
    async fn list_boards(&self) -> ApiResult<Vec<Board>> {
        self.get("/boards").await
    }

    async fn get_board(&self, id: BoardId) -> ApiResult<Board> {
        self.get(&format!("/boards/{id}")).await
    }

    async fn create_board(&self, board: &NewBoard) -> ApiResult<Board> {
        self.send_json(Method::POST, "/boards", board).await
    }

    async fn update_board(&self, id: BoardId, patch: &BoardPatch) -> ApiResult<Board> {
        self.send_json(Method::PUT, &format!("/boards/{id}"), patch)
            .await
    }

    async fn delete_board(&self, id: BoardId) -> ApiResult<()> {
        self.delete(&format!("/boards/{id}")).await
    }

    async fn list_columns(&self, board_id: BoardId) -> ApiResult<Vec<Column>> {
        self.get(&format!("/boards/{board_id}/columns")).await
    }

    async fn create_column(&self, board_id: BoardId, column: &NewColumn) -> ApiResult<Column> {
        self.send_json(Method::POST, &format!("/boards/{board_id}/columns"), column)
            .await
    }

    async fn update_column(&self, id: ColumnId, patch: &ColumnPatch) -> ApiResult<Column> {
        self.send_json(Method::PUT, &format!("/columns/{id}"), patch)
            .await
    }

    async fn delete_column(&self, id: ColumnId) -> ApiResult<()> {
        self.delete(&format!("/columns/{id}")).await
    }

    async fn list_tasks(&self, board_id: BoardId) -> ApiResult<Vec<TaskRecord>> {
        self.get(&format!("/boards/{board_id}/tasks")).await
    }

    async fn get_task(&self, id: TaskId) -> ApiResult<Task> {
        self.get(&format!("/tasks/{id}")).await
    }

    async fn create_task(&self, board_id: BoardId, task: &NewTask) -> ApiResult<Task> {
        self.send_json(Method::POST, &format!("/boards/{board_id}/tasks"), task)
            .await
    }

    async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> ApiResult<Task> {
        self.send_json(Method::PUT, &format!("/tasks/{id}"), patch)
            .await
    }

    async fn delete_task(&self, id: TaskId) -> ApiResult<()> {
        self.delete(&format!("/tasks/{id}")).await
    }

    async fn move_task(&self, id: TaskId, body: &MoveTask) -> ApiResult<Task> {
        self.send_json(Method::PUT, &format!("/tasks/{id}/move"), body)
            .await
    }

    async fn list_workflows(&self, board_id: BoardId) -> ApiResult<Vec<WorkflowDefinition>> {
        self.get(&format!("/boards/{board_id}/workflows")).await
    }

    async fn get_active_workflow(
        &self,
        board_id: BoardId,
    ) -> ApiResult<Option<WorkflowDefinition>> {
        let response = self
            .request(Method::GET, &format!("/boards/{board_id}/workflows/active"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_response(response).await?;
        Ok(response.json().await?)
    }

    async fn create_workflow(
        &self,
        board_id: BoardId,
        workflow: &NewWorkflow,
    ) -> ApiResult<WorkflowDefinition> {
        self.send_json(
            Method::POST,
            &format!("/boards/{board_id}/workflows"),
            workflow,
        )
        .await
    }

    async fn update_workflow(
        &self,
        id: WorkflowId,
        patch: &WorkflowPatch,
    ) -> ApiResult<WorkflowDefinition> {
        self.send_json(Method::PUT, &format!("/workflows/{id}"), patch)
            .await
    }

    async fn delete_workflow(&self, id: WorkflowId) -> ApiResult<()> {
        self.delete(&format!("/workflows/{id}")).await
    }

    async fn create_transition(
        &self,
        workflow_id: WorkflowId,
        transition: &NewTransition,
    ) -> ApiResult<Transition> {
        self.send_json(
            Method::POST,
            &format!("/workflows/{workflow_id}/transitions"),
            transition,
        )
        .await
    }

    async fn update_transition(
        &self,
        id: TransitionId,
        patch: &TransitionPatch,
    ) -> ApiResult<Transition> {
        self.send_json(Method::PUT, &format!("/transitions/{id}"), patch)
            .await
    }

    async fn delete_transition(&self, id: TransitionId) -> ApiResult<()> {
        self.delete(&format!("/transitions/{id}")).await
    }

    async fn allowed_transitions(&self, board_id: BoardId) -> ApiResult<AllowedTransitions> {
        self.get(&format!("/boards/{board_id}/allowed-transitions"))
            .await
    }

    async fn start_execution(
        &self,
        task_id: TaskId,
        request: &StartExecution,
    ) -> ApiResult<Execution> {
        self.send_json(Method::POST, &format!("/tasks/{task_id}/agent/start"), request)
            .await
    }

    async fn get_execution(&self, id: ExecutionId) -> ApiResult<Execution> {
        self.get(&format!("/executions/{id}")).await
    }

    async fn list_task_executions(&self, task_id: TaskId) -> ApiResult<Vec<Execution>> {
        self.get(&format!("/tasks/{task_id}/executions")).await
    }

    async fn cancel_execution(&self, id: ExecutionId) -> ApiResult<()> {
        self.delete(&format!("/executions/{id}")).await
    }

    async fn submit_clarification(
        &self,
        task_id: TaskId,
        answers: &serde_json::Value,
    ) -> ApiResult<ClarificationReceipt> {
        let body = serde_json::json!({ "answers": answers });
        self.send_json(Method::POST, &format!("/tasks/{task_id}/clarify"), &body)
            .await
    }

    async fn list_task_activities(
        &self,
        task_id: TaskId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<ActivityPage> {
        self.get(&paged(&format!("/tasks/{task_id}/activities"), page, page_size))
            .await
    }

    async fn list_board_activities(
        &self,
        board_id: BoardId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<BoardActivity> {
        self.get(&paged(&format!("/boards/{board_id}/activities"), page, page_size))
            .await
    }
}

fn paged(path: &str, page: u32, page_size: u32) -> String {
    format!("{path}?page={page}&page_size={page_size}")
}
