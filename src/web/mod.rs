//! REST API。
//!
//! 所有資料路由都掛在 `/api/v1` 之下，另有 `/health` 供健康檢查。

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::{declare::Market, logging};

mod brokers;
pub mod error;
mod institutional;
mod prices;
mod rankings;
mod stocks;
mod system;

pub use error::ApiError;

/// 分頁結果
#[derive(Serialize, Debug)]
pub struct Page<T> {
    pub total: i64,
    pub items: Vec<T>,
}

/// 指定日期的分頁結果，沒有任何資料時 `date` 為 null
#[derive(Serialize, Debug)]
pub struct DatedPage<T> {
    pub date: Option<NaiveDate>,
    pub total: i64,
    pub items: Vec<T>,
}

impl<T> DatedPage<T> {
    pub fn empty(date: Option<NaiveDate>) -> Self {
        DatedPage {
            date,
            total: 0,
            items: Vec::new(),
        }
    }
}

pub fn router() -> Router {
    let api = Router::new()
        .nest("/stocks", stocks::routes())
        .nest("/institutional", institutional::routes())
        .nest("/rankings", rankings::routes())
        .nest("/prices", prices::routes())
        .nest("/brokers", brokers::routes())
        .nest("/system", system::routes());

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
}

/// 監聽 `port` 直到程式結束
pub async fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;

    logging::info_console(format!("REST API listening on {}", addr));
    axum::serve(listener, router())
        .await
        .context("REST API server stopped")
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy", "service": "institutional_tracker" }))
}

/// 將 `limit` 限制在 1 到 `max` 之間，未提供時使用 `default`
pub(crate) fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

pub(crate) fn clamp_offset(offset: Option<i64>) -> i64 {
    offset.unwrap_or(0).max(0)
}

/// 空字串視為未指定，無法辨識的市場回傳 400
pub(crate) fn parse_market(market: Option<&str>) -> Result<Option<Market>, ApiError> {
    match market.map(str::trim).filter(|m| !m.is_empty()) {
        None => Ok(None),
        Some(m) => m
            .parse::<Market>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Market must be TWSE or TPEX but got {}", m))),
    }
}
