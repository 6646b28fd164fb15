use axum::{
    extract::{Path, Query},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    database::table::stock_price::{StockPrice, StockPriceView},
    util::datetime,
    web::{self, ApiError, DatedPage},
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/latest", get(latest))
        .route("/date/{trade_date}", get(by_date))
}

#[derive(Deserialize, Debug, Default)]
struct PageParams {
    market: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn latest(
    Query(params): Query<PageParams>,
) -> Result<Json<DatedPage<StockPriceView>>, ApiError> {
    match StockPrice::fetch_last_trade_date().await? {
        Some(date) => page(date, params).await,
        None => Ok(Json(DatedPage::empty(None))),
    }
}

async fn by_date(
    Path(trade_date): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<DatedPage<StockPriceView>>, ApiError> {
    let date = datetime::parse_date(&trade_date).ok_or_else(|| {
        ApiError::BadRequest(format!("Invalid trade_date {}, expected YYYY-MM-DD", trade_date))
    })?;

    page(date, params).await
}

async fn page(
    date: NaiveDate,
    params: PageParams,
) -> Result<Json<DatedPage<StockPriceView>>, ApiError> {
    let market = web::parse_market(params.market.as_deref())?;
    let (total, items) = StockPrice::fetch_page(
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
    async fn test_invalid_trade_date() {
        let response = routes()
            .oneshot(Request::builder().uri("/date/2024-02-30").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
