use axum::{
    extract::{Path, Query},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    cache::SHARE,
    database::table::{
        institutional_ratio::{InstitutionalRatio, InstitutionalRatioView},
        stock::Stock,
        stock_price::{StockPrice, StockPriceView},
    },
    web::{self, ApiError, Page},
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/", get(list))
        .route("/{code}", get(detail))
        .route("/{code}/institutional", get(institutional))
        .route("/{code}/prices", get(prices))
}

#[derive(Deserialize, Debug, Default)]
struct ListParams {
    market: Option<String>,
    search: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Deserialize, Debug, Default)]
struct HistoryParams {
    limit: Option<i64>,
}

/// 單一股票的時間序列，依日期遞增
#[derive(Serialize, Debug)]
struct Series<T> {
    code: String,
    name: String,
    market: String,
    data: Vec<T>,
}

impl<T> Series<T> {
    fn new(stock: Stock, data: Vec<T>) -> Self {
        Series {
            code: stock.code,
            name: stock.name,
            market: stock.market,
            data,
        }
    }
}

async fn list(Query(params): Query<ListParams>) -> Result<Json<Page<Stock>>, ApiError> {
    let market = web::parse_market(params.market.as_deref())?;
    let limit = web::clamp_limit(params.limit, 100, 1000);
    let offset = web::clamp_offset(params.offset);
    let (total, items) = Stock::list(market, params.search.as_deref(), limit, offset).await?;

    Ok(Json(Page { total, items }))
}

async fn detail(Path(code): Path<String>) -> Result<Json<Stock>, ApiError> {
    Ok(Json(find_stock(&code).await?))
}

async fn institutional(
    Path(code): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Series<InstitutionalRatioView>>, ApiError> {
    let stock = find_stock(&code).await?;
    let limit = web::clamp_limit(params.limit, 120, 500);
    let data = InstitutionalRatio::fetch_history(stock.id, limit).await?;

    Ok(Json(Series::new(stock, data)))
}

async fn prices(
    Path(code): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Series<StockPriceView>>, ApiError> {
    let stock = find_stock(&code).await?;
    let limit = web::clamp_limit(params.limit, 120, 500);
    let data = StockPrice::fetch_history(stock.id, limit).await?;

    Ok(Json(Series::new(stock, data)))
}

/// 先查快取，沒有時再查資料庫
async fn find_stock(code: &str) -> Result<Stock, ApiError> {
    let code = code.trim();
    if let Some(stock) = SHARE.get_stock(code) {
        return Ok(stock);
    }

    Stock::fetch_by_code(code)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Stock {} not found", code)))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn test_list_rejects_unknown_market() {
        let response = routes()
            .oneshot(Request::builder().uri("/?market=NYSE").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[ignore]
    async fn test_find_stock() {
        dotenv::dotenv().ok();
        crate::database::init().unwrap();
        assert!(find_stock("2330").await.is_ok());
        assert!(matches!(find_stock("0000").await, Err(ApiError::NotFound(_))));
    }
}
