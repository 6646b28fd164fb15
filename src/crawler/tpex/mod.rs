use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::crawler::{FetchedFlow, FetchedForeignHolding, FetchedQuote, InstitutionalSource};

/// 僑外資及陸資持股統計
pub mod foreign_holding;
/// 三大法人買賣明細
pub mod institutional_flow;
/// 台股收盤報價-上櫃
pub mod quote;

const HOST: &str = "tpex.org.tw";

/// 台灣證券櫃檯買賣中心(上櫃)
pub struct Tpex;

#[async_trait]
impl InstitutionalSource for Tpex {
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
