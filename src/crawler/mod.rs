//! 證交所、櫃買中心的公開資料抓取。
//!
//! 每個來源分成「下載」與「解析」兩段，解析只處理已解碼的內容，測試時不需要網路。

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    crawler::{tpex::Tpex, twse::Twse},
    declare::Market,
    util::convert::FromValue,
};

/// 富邦證券 e-Broker 網站
pub mod fbs;
/// 台灣證券櫃檯買賣中心
pub mod tpex;
/// 台灣證券交易所
pub mod twse;

/// 股票代號：4~5 碼數字，可帶英文字尾(例如特別股 2881A)
static SECURITY_CODE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^\d{4,5}[A-Z]*$").ok());

/// 單日三大法人買賣超股數
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFlow {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub trade_date: NaiveDate,
    /// 外資(不含外資自營商) + 外資自營商
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
}

/// 外資及陸資持股統計
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedForeignHolding {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub trade_date: NaiveDate,
    pub total_shares: Option<i64>,
    pub foreign_shares: Option<i64>,
    pub foreign_ratio: Option<Decimal>,
}

/// 每日收盤行情
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedQuote {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub trade_date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
    pub turnover: Option<i64>,
    pub change: Option<Decimal>,
    pub transactions: Option<i64>,
}

/// 各市場的法人資料來源
#[async_trait]
pub trait InstitutionalSource {
    /// 指定日期的三大法人買賣超，休市日回傳空集合
    async fn fetch_flows(date: NaiveDate) -> Result<Vec<FetchedFlow>>;
    /// 外資持股，`date` 為寫入的資料日期
    async fn fetch_foreign_holdings(date: NaiveDate) -> Result<Vec<FetchedForeignHolding>>;
    /// 最近一個交易日的收盤行情，回應中沒有日期時使用 `fallback_date`
    async fn fetch_quotes(fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>>;
    /// 指定日期的收盤行情，休市日回傳空集合
    async fn fetch_daily_quotes(date: NaiveDate) -> Result<Vec<FetchedQuote>>;
}

pub async fn fetch_flows(market: Market, date: NaiveDate) -> Result<Vec<FetchedFlow>> {
    match market {
        Market::Twse => Twse::fetch_flows(date).await,
        Market::Tpex => Tpex::fetch_flows(date).await,
    }
}

pub async fn fetch_foreign_holdings(
    market: Market,
    date: NaiveDate,
) -> Result<Vec<FetchedForeignHolding>> {
    match market {
        Market::Twse => Twse::fetch_foreign_holdings(date).await,
        Market::Tpex => Tpex::fetch_foreign_holdings(date).await,
    }
}

pub async fn fetch_quotes(market: Market, fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    match market {
        Market::Twse => Twse::fetch_quotes(fallback_date).await,
        Market::Tpex => Tpex::fetch_quotes(fallback_date).await,
    }
}

pub async fn fetch_daily_quotes(market: Market, date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    match market {
        Market::Twse => Twse::fetch_daily_quotes(date).await,
        Market::Tpex => Tpex::fetch_daily_quotes(date).await,
    }
}

/// 證交所、櫃買中心常見的 `{fields, data}` 表格
#[derive(Deserialize, Debug, Default, Clone)]
pub struct FieldTable {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<serde_json::Value>>,
}

/// 正規化股票代號，不是股票(權證、5~6 碼 ETF 等)時回傳 `None`。
///
/// 例︰`="0050"` => "0050"、"50" => "0050"
pub fn normalize_code(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '=' && *c != '"')
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let code = format!("{:0>4}", cleaned);

    match SECURITY_CODE.as_ref() {
        Some(re) if re.is_match(&code) => Some(code),
        _ => None,
    }
}

fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase()
}

/// 依欄位名稱找出位置。
///
/// 先比對正規化後完全相同的欄位，再找包含片段且名稱最短的欄位，
/// 避免「自營商買賣超股數」對到「外資自營商買賣超股數」。
pub fn find_field<S: AsRef<str>>(headers: &[S], candidates: &[&str]) -> Option<usize> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| normalize_header(h.as_ref()))
        .collect();

    for candidate in candidates {
        let candidate = normalize_header(candidate);
        if let Some(index) = normalized.iter().position(|h| *h == candidate) {
            return Some(index);
        }
    }

    for candidate in candidates {
        let candidate = normalize_header(candidate);
        let found = normalized
            .iter()
            .enumerate()
            .filter(|(_, h)| h.contains(&candidate))
            .min_by_key(|(_, h)| h.chars().count())
            .map(|(index, _)| index);
        if found.is_some() {
            return found;
        }
    }

    None
}

/// 取出表格中指定位置的儲存格
pub(crate) fn cell<V: FromValue>(row: &[V], index: Option<usize>) -> Option<&V> {
    row.get(index?)
}

/// 解析買賣超欄位，欄位不存在或為空值時視為 0
pub(crate) fn net_shares<V: FromValue>(row: &[V], index: Option<usize>) -> i64 {
    cell(row, index)
        .and_then(|v| v.get_optional_i64())
        .unwrap_or(0)
}

/// 買賣超表格的欄位位置
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlowColumns {
    code: usize,
    name: Option<usize>,
    foreign_ex: Option<usize>,
    foreign_dealer: Option<usize>,
    trust: usize,
    dealer: usize,
}

impl FlowColumns {
    /// 代號、投信、自營商為必要欄位
    pub(crate) fn locate<S: AsRef<str>>(headers: &[S]) -> Option<Self> {
        Some(FlowColumns {
            code: find_field(headers, &["證券代號", "代號"])?,
            name: find_field(headers, &["證券名稱", "名稱"]),
            foreign_ex: find_field(
                headers,
                &[
                    "外陸資買賣超股數(不含外資自營商)",
                    "外資及陸資(不含外資自營商)買賣超股數",
                    "外資及陸資買賣超股數(不含外資自營商)",
                    "外資及陸資買賣超股數",
                ],
            ),
            foreign_dealer: find_field(headers, &["外資自營商買賣超股數"]),
            trust: find_field(headers, &["投信買賣超股數"])?,
            dealer: find_field(headers, &["自營商買賣超股數合計", "自營商買賣超股數"])?,
        })
    }

    pub(crate) fn parse_row<V: FromValue>(
        &self,
        row: &[V],
        market: Market,
        trade_date: NaiveDate,
    ) -> Option<FetchedFlow> {
        let code = normalize_code(&cell(row, Some(self.code))?.get_text())?;

        Some(FetchedFlow {
            code,
            name: cell(row, self.name).map(|v| v.get_text()).unwrap_or_default(),
            market,
            trade_date,
            foreign_net: net_shares(row, self.foreign_ex) + net_shares(row, self.foreign_dealer),
            trust_net: net_shares(row, Some(self.trust)),
            dealer_net: net_shares(row, Some(self.dealer)),
        })
    }
}

/// 外資持股表格的欄位位置
#[derive(Debug, Clone, Copy)]
pub(crate) struct HoldingColumns {
    code: usize,
    name: Option<usize>,
    total_shares: Option<usize>,
    foreign_shares: Option<usize>,
    foreign_ratio: Option<usize>,
}

impl HoldingColumns {
    pub(crate) fn locate<S: AsRef<str>>(headers: &[S]) -> Option<Self> {
        Some(HoldingColumns {
            code: find_field(headers, &["證券代號", "代號"])?,
            name: find_field(headers, &["證券名稱", "名稱"]),
            total_shares: find_field(headers, &["發行股數"]),
            foreign_shares: find_field(
                headers,
                &["全體外資及陸資持有股數", "僑外資及陸資持有股數"],
            ),
            foreign_ratio: find_field(
                headers,
                &["全體外資及陸資持股比率", "僑外資及陸資持股比率"],
            ),
        })
    }

    pub(crate) fn parse_row<V: FromValue>(
        &self,
        row: &[V],
        market: Market,
        trade_date: NaiveDate,
    ) -> Option<FetchedForeignHolding> {
        let code = normalize_code(&cell(row, Some(self.code))?.get_text())?;

        Some(FetchedForeignHolding {
            code,
            name: cell(row, self.name).map(|v| v.get_text()).unwrap_or_default(),
            market,
            trade_date,
            total_shares: cell(row, self.total_shares)
                .and_then(|v| v.get_optional_i64())
                .filter(|v| *v > 0),
            foreign_shares: cell(row, self.foreign_shares).and_then(|v| v.get_optional_i64()),
            foreign_ratio: cell(row, self.foreign_ratio).and_then(|v| v.get_optional_decimal()),
        })
    }
}

/// 收盤行情表格的欄位位置
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuoteColumns {
    code: usize,
    name: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: usize,
    volume: Option<usize>,
    turnover: Option<usize>,
    change: Option<usize>,
    /// 證交所的漲跌價差不帶正負號，方向放在另一欄
    direction: Option<usize>,
    transactions: Option<usize>,
}

impl QuoteColumns {
    pub(crate) fn locate<S: AsRef<str>>(headers: &[S]) -> Option<Self> {
        Some(QuoteColumns {
            code: find_field(headers, &["證券代號", "代號"])?,
            name: find_field(headers, &["證券名稱", "名稱"]),
            open: find_field(headers, &["開盤價", "開盤"]),
            high: find_field(headers, &["最高價", "最高"]),
            low: find_field(headers, &["最低價", "最低"]),
            close: find_field(headers, &["收盤價", "收盤"])?,
            volume: find_field(headers, &["成交股數"]),
            turnover: find_field(headers, &["成交金額"]),
            change: find_field(headers, &["漲跌價差", "漲跌"]),
            direction: find_field(headers, &["漲跌(+/-)"]),
            transactions: find_field(headers, &["成交筆數"]),
        })
    }

    /// 沒有收盤價(當日無成交)的列會被略過
    pub(crate) fn parse_row<V: FromValue>(
        &self,
        row: &[V],
        market: Market,
        trade_date: NaiveDate,
    ) -> Option<FetchedQuote> {
        let code = normalize_code(&cell(row, Some(self.code))?.get_text())?;
        let close = cell(row, Some(self.close))?.get_optional_decimal()?;
        let decimal = |index: Option<usize>| cell(row, index).and_then(|v| v.get_optional_decimal());
        let integer = |index: Option<usize>| cell(row, index).and_then(|v| v.get_optional_i64());

        let change = decimal(self.change).map(|change| {
            let falling = cell(row, self.direction).is_some_and(|v| v.get_text().contains('-'));
            if falling && change > Decimal::ZERO {
                -change
            } else {
                change
            }
        });

        Some(FetchedQuote {
            code,
            name: cell(row, self.name).map(|v| v.get_text()).unwrap_or_default(),
            market,
            trade_date,
            open: decimal(self.open),
            high: decimal(self.high),
            low: decimal(self.low),
            close: Some(close),
            volume: integer(self.volume),
            turnover: integer(self.turnover),
            change,
            transactions: integer(self.transactions),
        })
    }
}
