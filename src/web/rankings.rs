use axum::{
    extract::{Path, Query},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    calculation::ranking::{self, RankedSecurity, RankingQuery},
    database::table::institutional_ratio::InstitutionalRatio,
    declare::{ChangeWindow, Market, RankDirection},
    web::{self, ApiError},
};

pub(super) fn routes() -> Router {
    Router::new()
        .route("/{window}", get(by_query))
        .route("/{window}/up", get(gainers))
        .route("/{window}/down", get(losers))
}

#[derive(Deserialize, Debug, Default)]
struct RankingParams {
    direction: Option<String>,
    market: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize, Debug)]
struct RankingItem {
    code: String,
    name: String,
    market: Market,
    #[serde(with = "rust_decimal::serde::float_option")]
    three_inst_ratio: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    change: Decimal,
}

impl From<RankedSecurity> for RankingItem {
    fn from(ranked: RankedSecurity) -> Self {
        RankingItem {
            code: ranked.code,
            name: ranked.name,
            market: ranked.market,
            three_inst_ratio: ranked.three_inst_ratio,
            change: ranked.change,
        }
    }
}

#[derive(Serialize, Debug)]
struct RankingResponse {
    window: usize,
    direction: &'static str,
    date: Option<NaiveDate>,
    total: usize,
    items: Vec<RankingItem>,
}

async fn by_query(
    Path(window): Path<String>,
    Query(params): Query<RankingParams>,
) -> Result<Json<RankingResponse>, ApiError> {
    let direction = match params.direction.as_deref() {
        None => RankDirection::default(),
        Some(d) => d
            .parse::<RankDirection>()
            .map_err(|_| ApiError::BadRequest("Direction must be up or down".to_string()))?,
    };

    respond(&window, direction, params).await
}

async fn gainers(
    Path(window): Path<String>,
    Query(params): Query<RankingParams>,
) -> Result<Json<RankingResponse>, ApiError> {
    respond(&window, RankDirection::Gainers, params).await
}

async fn losers(
    Path(window): Path<String>,
    Query(params): Query<RankingParams>,
) -> Result<Json<RankingResponse>, ApiError> {
    respond(&window, RankDirection::Losers, params).await
}

async fn respond(
    window: &str,
    direction: RankDirection,
    params: RankingParams,
) -> Result<Json<RankingResponse>, ApiError> {
    let query = RankingQuery {
        window: parse_window(window)?,
        market: web::parse_market(params.market.as_deref())?,
        limit: web::clamp_limit(params.limit, 200, 500) as usize,
        direction,
    };

    let date = InstitutionalRatio::fetch_latest_date().await?;
    let items = match date {
        Some(date) => {
            let candidates = InstitutionalRatio::fetch_for_ranking(date).await?;
            ranking::rank(&candidates, &query)
        }
        None => Vec::new(),
    };

    Ok(Json(RankingResponse {
        window: query.window.days(),
        direction: direction.code(),
        date,
        total: items.len(),
        items: items.into_iter().map(RankingItem::from).collect(),
    }))
}

fn parse_window(window: &str) -> Result<ChangeWindow, ApiError> {
    window
        .parse::<ChangeWindow>()
        .map_err(|_| ApiError::BadRequest("Window must be 5, 20, 60, or 120".to_string()))
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request, http::StatusCode};
    use rust_decimal_macros::dec;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("60").unwrap(), ChangeWindow::D60);
        assert!(matches!(parse_window("10"), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_item_serializes_numbers() {
        let item = RankingItem {
            code: "2330".to_string(),
            name: "台積電".to_string(),
            market: Market::Twse,
            three_inst_ratio: None,
            change: dec!(1.25),
        };
        let value = serde_json::to_value(&item).unwrap();

        assert_eq!(value["market"], "TWSE");
        assert_eq!(value["change"], 1.25);
        assert!(value["three_inst_ratio"].is_null());
    }

    #[tokio::test]
    async fn test_bad_request() {
        for uri in ["/7", "/20?direction=sideways", "/20/up?market=NYSE"] {
            let response = routes()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
        }
    }
}
