use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::crawler::{FetchedFlow, FetchedForeignHolding, FetchedQuote, InstitutionalSource};

/// 外資及陸資投資持股統計
pub mod foreign_holding;
/// 三大法人買賣超日報
pub mod institutional_flow;
/// 台股收盤報價-上市
pub mod quote;

const HOST: &str = "twse.com.tw";

/// 台灣證券交易所(上市)
pub struct Twse;

#[async_trait]
impl InstitutionalSource for Twse {
    async fn fetch_flows(date: NaiveDate) -> Result<Vec<FetchedFlow>> {
        institutional_flow::visit(date).await
    }

    async fn fetch_foreign_holdings(date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
        foreign_holding::visit(date).await
    }

    async fn fetch_quotes(fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
        quote::visit(fallback_date).await
    }

    async fn fetch_daily_quotes(date: NaiveDate) -> Result<Vec<FetchedQuote>> {
        quote::visit_daily(date).await
    }
}

/// 證交所回應的 stat 為 "OK" 才有資料，其餘(例如「很抱歉，沒有符合條件的資料!」)視為休市
fn is_ok(stat: Option<&str>) -> bool {
    stat.is_some_and(|s| s.trim().eq_ignore_ascii_case("ok"))
}
