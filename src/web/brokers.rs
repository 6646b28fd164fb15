use axum::{
    extract::{Path, Query},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    database::table::broker_trade::{BrokerTrade, BrokerTradeFilter, BrokerTradeView},
    declare::BrokerSide,
    web::{self, ApiError, DatedPage},
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/trades", get(trades))
        .route("/ranking", get(ranking))
        .route("/{broker_name}/history", get(history))
}

#[derive(Deserialize, Debug, Default)]
struct TradeParams {
    trade_date: Option<NaiveDate>,
    stock_code: Option<String>,
    broker_name: Option<String>,
    side: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
struct RankingParams {
    trade_date: Option<NaiveDate>,
    limit: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
struct HistoryParams {
    stock_code: Option<String>,
    limit: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_side(side: Option<&str>) -> Result<Option<BrokerSide>, ApiError> {
    match side.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<BrokerSide>()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Side must be buy or sell but got {}", s))),
    }
}

/// `trade_date` 未指定時使用資料表中最新的日期
async fn trades(Query(params): Query<TradeParams>) -> Result<Json<DatedPage<BrokerTradeView>>, ApiError> {
    let filter = BrokerTradeFilter {
        side: parse_side(params.side.as_deref())?,
        stock_code: non_empty(params.stock_code),
        broker_name: non_empty(params.broker_name),
    };
    let date = match params.trade_date {
        Some(date) => Some(date),
        None => BrokerTrade::fetch_last_trade_date().await?,
    };
    let Some(date) = date else {
        return Ok(Json(DatedPage::empty(None)));
    };

    let (total, items) = BrokerTrade::fetch_page(
        date,
        &filter,
        web::clamp_limit(params.limit, 100, 1000),
        web::clamp_offset(params.offset),
    )
    .await?;

    Ok(Json(DatedPage {
        date: Some(date),
        total,
        items,
    }))
}

async fn ranking(Query(params): Query<RankingParams>) -> Result<Json<Value>, ApiError> {
    let date = match params.trade_date {
        Some(date) => Some(date),
        None => BrokerTrade::fetch_last_trade_date().await?,
    };
    let Some(date) = date else {
        return Ok(Json(json!({ "date": null, "total": 0, "items": [] })));
    };

    let items = BrokerTrade::fetch_ranking(date, web::clamp_limit(params.limit, 50, 200)).await?;

    Ok(Json(json!({ "date": date, "total": items.len(), "items": items })))
}

/// 券商名稱為部分比對
async fn history(
    Path(broker_name): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Value>, ApiError> {
    let broker_name = broker_name.trim().to_string();
    if broker_name.is_empty() {
        return Err(ApiError::BadRequest("Broker name must not be empty".to_string()));
    }

    let stock_code = non_empty(params.stock_code);
    let items = BrokerTrade::fetch_history(
        &broker_name,
        stock_code.as_deref(),
        web::clamp_limit(params.limit, 100, 500),
    )
    .await?;

    Ok(Json(json!({
        "broker_name": broker_name,
        "total": items.len(),
        "items": items,
    })))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_parse_side() {
        assert_eq!(parse_side(None).unwrap(), None);
        assert_eq!(parse_side(Some("")).unwrap(), None);
        assert_eq!(parse_side(Some("SELL")).unwrap(), Some(BrokerSide::Sell));
        assert!(matches!(parse_side(Some("hold")), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some(" 2330 ".to_string())), Some("2330".to_string()));
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(None), None);
    }

    #[tokio::test]
    async fn test_invalid_query() {
        for uri in [
            "/trades?side=hold",
            "/trades?trade_date=2024-02-30",
            "/ranking?trade_date=yesterday",
            "/ranking?limit=abc",
            "/%20/history",
        ] {
            let response = routes()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_trades() {
        dotenv::dotenv().ok();
        crate::database::init().unwrap();
        let response = routes()
            .oneshot(
                Request::builder()
                    .uri("/trades?side=buy&limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
