use axum::{extract::Query, routing::get, Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    database::table::{
        foreign_holding::{ForeignHolding, ForeignHoldingView},
        institutional_flow::{InstitutionalFlow, InstitutionalFlowView},
        institutional_ratio::{InstitutionalRatio, InstitutionalRatioView},
    },
    web::{self, ApiError, DatedPage},
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/flows", get(flows))
        .route("/holdings", get(holdings))
        .route("/ratios", get(ratios))
}

/// `trade_date` 未指定時使用資料表中最新的日期
#[derive(Deserialize, Debug, Default)]
struct DateParams {
    trade_date: Option<NaiveDate>,
    market: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn flows(
    Query(params): Query<DateParams>,
) -> Result<Json<DatedPage<InstitutionalFlowView>>, ApiError> {
    let market = web::parse_market(params.market.as_deref())?;
    let date = match params.trade_date {
        Some(date) => Some(date),
        None => InstitutionalFlow::fetch_last_trade_date().await?,
    };
    let Some(date) = date else {
        return Ok(Json(DatedPage::empty(None)));
    };

    let (total, items) = InstitutionalFlow::fetch_page(
        date,
        market,
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

async fn holdings(
    Query(params): Query<DateParams>,
) -> Result<Json<DatedPage<ForeignHoldingView>>, ApiError> {
    let market = web::parse_market(params.market.as_deref())?;
    let date = match params.trade_date {
        Some(date) => Some(date),
        None => ForeignHolding::fetch_last_trade_date().await?,
    };
    let Some(date) = date else {
        return Ok(Json(DatedPage::empty(None)));
    };

    let (total, items) = ForeignHolding::fetch_page(
        date,
        market,
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

async fn ratios(
    Query(params): Query<DateParams>,
) -> Result<Json<DatedPage<InstitutionalRatioView>>, ApiError> {
    let market = web::parse_market(params.market.as_deref())?;
    let date = match params.trade_date {
        Some(date) => Some(date),
        None => InstitutionalRatio::fetch_latest_date().await?,
    };
    let Some(date) = date else {
        return Ok(Json(DatedPage::empty(None)));
    };

    let (total, items) = InstitutionalRatio::fetch_page(
        date,
        market,
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

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_invalid_query() {
        for uri in [
            "/flows?market=NYSE",
            "/ratios?trade_date=2024-13-01",
            "/holdings?limit=abc",
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
    async fn test_ratios() {
        dotenv::dotenv().ok();
        crate::database::init().unwrap();
        let response = routes()
            .oneshot(Request::builder().uri("/ratios?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
