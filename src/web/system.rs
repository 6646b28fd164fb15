use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::{
    database::table::system_status::{self, SystemStatus},
    web::ApiError,
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/etl-status", get(etl_status))
        .route("/broker-status", get(broker_status))
}

/// 前端輪詢用，尚未執行過 ETL 時回傳 idle
async fn etl_status() -> Result<Json<Value>, ApiError> {
    let status = SystemStatus::fetch(system_status::ETL_STATUS).await?;

    Ok(Json(to_json(status)))
}

async fn broker_status() -> Result<Json<Value>, ApiError> {
    let status = SystemStatus::fetch(system_status::BROKER_STATUS).await?;

    Ok(Json(to_json(status)))
}

fn to_json(status: Option<SystemStatus>) -> Value {
    match status {
        Some(s) => json!({
            "status": s.status_value,
            "message": s.message,
            "started_at": s.started_at,
            "completed_at": s.completed_at,
            "updated_at": s.updated_at,
        }),
        None => json!({
            "status": "idle",
            "message": "系統待機中",
            "started_at": null,
            "completed_at": null,
            "updated_at": null,
        }),
    }
}
