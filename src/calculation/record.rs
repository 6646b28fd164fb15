//! 估算流程使用的資料列。
//!
//! 這些型別不依賴資料庫或傳輸格式，由 `database::table::*` 與 `crawler::*` 轉換而來。

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::declare::{ChangeWindow, Market};

/// 股票基本資料
#[derive(Debug, Clone, PartialEq)]
pub struct Security {
    pub code: String,
    pub name: String,
    pub market: Market,
    /// 發行股數，可能尚未取得或已過時
    pub total_shares: Option<i64>,
    pub is_active: bool,
}

/// 單日三大法人買賣超股數(正數為買超)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyFlow {
    pub security_code: String,
    pub trade_date: NaiveDate,
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
}

/// 投信、自營商於某日的已知持股，用來校正累加誤差
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub security_code: String,
    pub baseline_date: NaiveDate,
    pub trust_shares_base: i64,
    pub dealer_shares_base: i64,
}

/// 官方公布的外資持股
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignHolding {
    pub security_code: String,
    pub trade_date: NaiveDate,
    pub total_shares: Option<i64>,
    pub foreign_shares: Option<i64>,
    pub foreign_ratio: Option<Decimal>,
}

/// 各回溯視窗的比例變化，未定義時為 `None`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowChanges {
    pub change_5d: Option<Decimal>,
    pub change_20d: Option<Decimal>,
    pub change_60d: Option<Decimal>,
    pub change_120d: Option<Decimal>,
}

impl WindowChanges {
    pub fn get(&self, window: ChangeWindow) -> Option<Decimal> {
        match window {
            ChangeWindow::D5 => self.change_5d,
            ChangeWindow::D20 => self.change_20d,
            ChangeWindow::D60 => self.change_60d,
            ChangeWindow::D120 => self.change_120d,
        }
    }

    pub fn set(&mut self, window: ChangeWindow, value: Option<Decimal>) {
        match window {
            ChangeWindow::D5 => self.change_5d = value,
            ChangeWindow::D20 => self.change_20d = value,
            ChangeWindow::D60 => self.change_60d = value,
            ChangeWindow::D120 => self.change_120d = value,
        }
    }
}

/// 單一股票單日的法人持股比例(衍生資料)
#[derive(Debug, Clone, PartialEq)]
pub struct InstitutionalRatio {
    pub security_code: String,
    pub trade_date: NaiveDate,
    /// 外資持股比例(官方公布)
    pub foreign_ratio: Option<Decimal>,
    /// 投信持股比例(估算)
    pub trust_ratio_est: Option<Decimal>,
    /// 自營商持股比例(估算)
    pub dealer_ratio_est: Option<Decimal>,
    /// 三大法人持股比例(估算)
    pub three_inst_ratio_est: Option<Decimal>,
    pub trust_shares_est: Option<i64>,
    pub dealer_shares_est: Option<i64>,
    pub changes: WindowChanges,
}

impl InstitutionalRatio {
    pub fn new(security_code: String, trade_date: NaiveDate) -> Self {
        InstitutionalRatio {
            security_code,
            trade_date,
            foreign_ratio: None,
            trust_ratio_est: None,
            dealer_ratio_est: None,
            three_inst_ratio_est: None,
            trust_shares_est: None,
            dealer_shares_est: None,
            changes: WindowChanges::default(),
        }
    }
}
