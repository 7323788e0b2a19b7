// HTTP request handlers
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::batch::{BatchId, BatchStatus};
use crate::domain::error::MonitorError;
use crate::domain::report::{DatasetComparison, ResultEnvelope, StreamSummary};
use crate::domain::series::{Series, SeriesColumns};
use crate::infrastructure::csv_export::{batch_csv, combined_csv};
use crate::infrastructure::subscriber_hub::{HubMessage, SubscriberHub, Subscription};
use crate::presentation::app_state::AppState;

/// Error body returned as `{"detail": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        let status = match &err {
            MonitorError::ReferenceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::InvalidBatchId(_)
            | MonitorError::InvalidSeries(_)
            | MonitorError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
            MonitorError::NotAvailable(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, detail = %self.detail, "Request failed");
        }
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    #[serde(default)]
    pub format: ExportFormat,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub generated_data: SeriesColumns,
    #[serde(default = "default_use_reference")]
    pub use_golden_standard: bool,
    #[serde(default)]
    pub custom_golden_standard: Option<SeriesColumns>,
}

fn default_use_reference() -> bool {
    true
}

/// One row of the batch overview.
#[derive(Debug, Serialize)]
pub struct BatchOverview {
    pub status: BatchStatus,
    pub quality_score: f64,
    pub sample_index: usize,
    pub total_samples: usize,
    pub target_status: BatchStatus,
    pub last_update: DateTime<Utc>,
}

impl From<&ResultEnvelope> for BatchOverview {
    fn from(envelope: &ResultEnvelope) -> Self {
        Self {
            status: envelope.comparison.status.overall,
            quality_score: envelope.comparison.quality_score,
            sample_index: envelope.data_point.sample_index,
            total_samples: envelope.data_point.total_samples,
            target_status: envelope.data_point.target_status,
            last_update: envelope.produced_at,
        }
    }
}

/// All routes, with state attached.
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/health", get(service_health))
        .route("/api/batches", get(list_batches))
        .route("/api/batches/:id", get(get_batch))
        .route("/api/batches/:id/history", get(get_batch_history))
        .route("/api/batches/:id/download", get(download_batch))
        .route("/api/summary", get(summary))
        .route("/api/export/all", get(export_all))
        .route("/api/reference", get(get_reference))
        .route("/api/compare", post(compare))
        .route("/api/comparison-report", post(comparison_report))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn service_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let reference = state.comparator.reference();
    Json(json!({
        "status": "healthy",
        "reference_loaded": reference.is_some(),
        "novelty_detector_ready": reference.is_some(),
        "subscribers": state.hub.subscriber_count(),
        "alerts_dropped": state.alerts.dropped(),
        "timestamp": Utc::now(),
    }))
}

pub async fn list_batches(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let batches: BTreeMap<BatchId, BatchOverview> = state
        .history
        .latest_all()
        .iter()
        .map(|envelope| (envelope.batch_id, BatchOverview::from(envelope)))
        .collect();

    Json(json!({
        "total_batches": batches.len(),
        "batches": batches,
        "retrieved_at": Utc::now(),
    }))
}

pub async fn get_batch(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let batch_id = BatchId::new(id)?;
    let envelope = state
        .history
        .latest(batch_id)
        .ok_or(MonitorError::NotAvailable(batch_id.get()))?;

    Ok(Json(json!({
        "batch_number": batch_id,
        "data_point": envelope.data_point,
        "comparison": envelope.comparison,
        "retrieved_at": Utc::now(),
    })))
}

fn history_for(state: &AppState, id: i64) -> ApiResult<(BatchId, Vec<ResultEnvelope>)> {
    let batch_id = BatchId::new(id)?;
    let history = state.history.get_history(batch_id);
    if history.is_empty() {
        return Err(MonitorError::NotAvailable(batch_id.get()).into());
    }
    Ok((batch_id, history))
}

pub async fn get_batch_history(
    Path(id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let (batch_id, history) = history_for(&state, id)?;
    Ok(Json(json!({
        "batch_number": batch_id,
        "total_points": history.len(),
        "history": history,
    })))
}

fn attachment(filename: String, content_type: &str, body: String) -> Response {
    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename={}", filename)),
    ];
    (headers, body).into_response()
}

pub async fn download_batch(
    Path(id): Path<i64>,
    Query(query): Query<FormatQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let (batch_id, history) = history_for(&state, id)?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");

    match query.format {
        ExportFormat::Csv => Ok(attachment(
            format!("batch_{}_history_{}.csv", batch_id, stamp),
            "text/csv",
            batch_csv(&history).map_err(|e| ApiError::internal(format!("{:#}", e)))?,
        )),
        ExportFormat::Json => {
            let body = serde_json::to_string_pretty(&json!({
                "batch_number": batch_id,
                "export_timestamp": Utc::now(),
                "total_points": history.len(),
                "data": history,
            }))
            .map_err(|e| ApiError::internal(e.to_string()))?;
            Ok(attachment(
                format!("batch_{}_history_{}.json", batch_id, stamp),
                "application/json",
                body,
            ))
        }
    }
}

pub async fn summary(State(state): State<Arc<AppState>>) -> Json<StreamSummary> {
    Json(StreamSummary::from_latest(&state.history.latest_all()))
}

pub async fn export_all(
    Query(query): Query<FormatQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let batches: Vec<(BatchId, Vec<ResultEnvelope>)> = BatchId::all()
        .map(|id| (id, state.history.get_history(id)))
        .filter(|(_, history)| !history.is_empty())
        .collect();
    if batches.is_empty() {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            detail: "no batch data available yet".into(),
        });
    }
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");

    match query.format {
        ExportFormat::Csv => Ok(attachment(
            format!("all_batches_{}.csv", stamp),
            "text/csv",
            combined_csv(&batches).map_err(|e| ApiError::internal(format!("{:#}", e)))?,
        )),
        ExportFormat::Json => {
            let by_batch: BTreeMap<BatchId, Vec<ResultEnvelope>> = batches.into_iter().collect();
            let body = serde_json::to_string_pretty(&json!({
                "export_timestamp": Utc::now(),
                "total_batches": by_batch.len(),
                "batches": by_batch,
            }))
            .map_err(|e| ApiError::internal(e.to_string()))?;
            Ok(attachment(format!("all_batches_{}.json", stamp), "application/json", body))
        }
    }
}

pub async fn get_reference(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let model = state.comparator.reference().ok_or(MonitorError::ReferenceUnavailable)?;
    Ok(Json(json!({
        "series": model.series(),
        "stats": model.stats(),
        "anomaly_threshold": model.detector().threshold(),
        "contamination": model.detector().contamination(),
    })))
}

/// Runs the full-series comparison off the async executor.
async fn run_comparison(state: &AppState, request: CompareRequest) -> ApiResult<DatasetComparison> {
    let generated = Series::from_columns(request.generated_data)?;
    let reference = match (request.use_golden_standard, request.custom_golden_standard) {
        (false, Some(columns)) => Some(Series::from_columns(columns)?),
        _ => None,
    };

    let comparator = state.comparator.clone();
    let comparison = tokio::task::spawn_blocking(move || {
        comparator.compare_series(&generated, reference.as_ref())
    })
    .await
        .map_err(|e| ApiError::internal(format!("comparison task failed: {}", e)))??;

    tracing::info!(
        points = comparison.compared_points,
        status = %comparison.assessment.overall_status,
        quality = comparison.assessment.quality_score,
        "Dataset comparison complete"
    );
    Ok(comparison)
}

pub async fn compare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<Json<DatasetComparison>> {
    Ok(Json(run_comparison(&state, request).await?))
}

pub async fn comparison_report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let comparison = run_comparison(&state, request).await?;
    Ok(Json(json!({ "report": comparison.to_string() })))
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: SubscriberHub) {
    let Subscription { id, mut receiver } = hub.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = receiver.recv() => {
                // None once the hub has dropped this subscriber
                let Some(message) = outgoing else { break };
                if let Err(e) = send_json(&mut sink, &message).await {
                    tracing::debug!(subscriber = id, error = %e, "WebSocket send failed");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                    if send_json(&mut sink, &HubMessage::Pong).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    hub.unsubscribe(id);
}

async fn send_json(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &HubMessage,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(message)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alert_state::AlertDispatcher;
    use crate::application::comparator::tests::golden;
    use crate::application::comparator::Comparator;
    use crate::application::history::tests::envelope;
    use crate::application::history::HistoryStore;
    use crate::application::reference_model::ReferenceModel;
    use crate::infrastructure::config::Settings;

    async fn serve(with_reference: bool) -> (String, HistoryStore) {
        let settings = Settings::default();
        let reference = with_reference
            .then(|| Arc::new(ReferenceModel::new(golden(40), &settings.novelty).unwrap()));
        let history = HistoryStore::new(None);
        let state = Arc::new(AppState {
            comparator: Arc::new(Comparator::new(reference, &settings)),
            history: history.clone(),
            hub: SubscriberHub::new(8, 0),
            alerts: AlertDispatcher::disabled(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, routes(state)).await.unwrap();
        });
        (format!("http://{}", addr), history)
    }

    #[tokio::test]
    async fn test_batch_lookup_status_codes() {
        let (base, history) = serve(false).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{}/api/batches/9", base)).send().await.unwrap();
        assert_eq!(res.status(), 400);
        let res = client.get(format!("{}/api/batches/2", base)).send().await.unwrap();
        assert_eq!(res.status(), 404);

        history.append(envelope(2, 0, 92.0, BatchStatus::Acceptable));
        let body: serde_json::Value = client
            .get(format!("{}/api/batches/2", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["batch_number"], 2);
        assert_eq!(body["comparison"]["quality_score"], 92.0);

        let overview: serde_json::Value = client
            .get(format!("{}/api/batches", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(overview["total_batches"], 1);
        assert_eq!(overview["batches"]["2"]["status"], "acceptable");
    }

    #[tokio::test]
    async fn test_downloads_and_summary() {
        let (base, history) = serve(false).await;
        let client = reqwest::Client::new();
        history.append(envelope(1, 0, 99.0, BatchStatus::Perfect));
        history.append(envelope(1, 1, 98.0, BatchStatus::Perfect));
        history.append(envelope(3, 0, 70.0, BatchStatus::Failed));

        let res = client
            .get(format!("{}/api/batches/1/download?format=csv", base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-type"], "text/csv");
        assert_eq!(res.text().await.unwrap().lines().count(), 3);

        let all = client
            .get(format!("{}/api/export/all?format=csv", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(all.lines().count(), 4);

        let summary: serde_json::Value = client
            .get(format!("{}/api/summary", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(summary["total_active_batches"], 2);
        assert_eq!(summary["batches_needing_attention"], 1);
    }

    #[tokio::test]
    async fn test_missing_reference_is_unavailable() {
        let (base, _history) = serve(false).await;
        let client = reqwest::Client::new();

        let res = client.get(format!("{}/api/reference", base)).send().await.unwrap();
        assert_eq!(res.status(), 503);

        let res = client
            .post(format!("{}/api/compare", base))
            .json(&json!({ "generated_data": golden(10).to_columns() }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 503);

        let health: serde_json::Value = client
            .get(format!("{}/api/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["reference_loaded"], false);
    }

    #[tokio::test]
    async fn test_compare_and_report() {
        let (base, _history) = serve(true).await;
        let client = reqwest::Client::new();

        let comparison: serde_json::Value = client
            .post(format!("{}/api/compare", base))
            .json(&json!({ "generated_data": golden(40).to_columns() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(comparison["compared_points"], 40);
        assert_eq!(comparison["deviations"]["ph"]["status"], "normal");

        let report: serde_json::Value = client
            .post(format!("{}/api/comparison-report", base))
            .json(&json!({ "generated_data": golden(40).to_columns() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(report["report"].as_str().unwrap().contains("FERMENTATION DATA COMPARISON REPORT"));

        let res = client
            .post(format!("{}/api/compare", base))
            .json(&json!({ "generated_data": { "timestamps": [1.0, 0.5], "ph": [5.5, 5.4],
                "temperature": [18.0, 18.1], "co2": [0.0, 0.1] } }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400);
    }
}
