//! 投信與自營商持股估算。
//!
//! 以每日買賣超累加成持股，遇到基準持股(baseline)時重新定錨：
//! `trust_shares_est(d) = anchor + Σ trust_net，日期落在 (baseline_date, d]`。
//! 沒有任何基準時 anchor 為 0，從第一筆買賣超開始累加。

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::{
    calculation::record::{Baseline, DailyFlow},
    error::CalculationError,
};

/// 單日的持股估算結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldingsEstimate {
    pub trade_date: NaiveDate,
    pub trust_shares_est: i64,
    pub dealer_shares_est: i64,
}

/// 單一股票的持股累加狀態 (anchor, baseline_cursor, running_sum)
#[derive(Debug, Clone)]
pub struct HoldingsAccumulator {
    security_code: String,
    /// 依日期遞增且同日只留一筆
    baselines: Vec<Baseline>,
    cursor: usize,
    trust_anchor: i64,
    dealer_anchor: i64,
    trust_running: i64,
    dealer_running: i64,
    last_date: Option<NaiveDate>,
}

impl HoldingsAccumulator {
    pub fn new(security_code: &str, baselines: &[Baseline]) -> Self {
        HoldingsAccumulator {
            security_code: security_code.to_string(),
            baselines: sort_baselines(baselines),
            cursor: 0,
            trust_anchor: 0,
            dealer_anchor: 0,
            trust_running: 0,
            dealer_running: 0,
            last_date: None,
        }
    }

    /// 累加下一個交易日的買賣超並回傳當日估算值。
    ///
    /// 日期必須嚴格晚於上一筆，否則回傳 `OutOfOrderInput` 且狀態不變，
    /// 呼叫端應改用 [`estimate_holdings`] 重新計算整段序列。
    pub fn push(&mut self, flow: &DailyFlow) -> Result<HoldingsEstimate, CalculationError> {
        if let Some(last) = self.last_date {
            if flow.trade_date <= last {
                return Err(CalculationError::OutOfOrderInput {
                    code: self.security_code.clone(),
                    date: flow.trade_date,
                    last,
                });
            }
        }

        Ok(self.advance(flow))
    }

    /// 不檢查日期順序的累加，`flow` 必須晚於上一筆
    fn advance(&mut self, flow: &DailyFlow) -> HoldingsEstimate {
        // 只套用日期 <= 當日的最新一筆基準，較早的基準會被取代
        let mut applied: Option<(NaiveDate, i64, i64)> = None;
        while let Some(baseline) = self.baselines.get(self.cursor) {
            if baseline.baseline_date > flow.trade_date {
                break;
            }
            applied = Some((
                baseline.baseline_date,
                baseline.trust_shares_base,
                baseline.dealer_shares_base,
            ));
            self.cursor += 1;
        }

        let mut anchored_today = false;
        if let Some((baseline_date, trust_base, dealer_base)) = applied {
            self.trust_anchor = trust_base;
            self.dealer_anchor = dealer_base;
            self.trust_running = 0;
            self.dealer_running = 0;
            // 基準日當天的買賣超已包含在基準持股內
            anchored_today = baseline_date == flow.trade_date;
        }

        if !anchored_today {
            self.trust_running += flow.trust_net;
            self.dealer_running += flow.dealer_net;
        }

        self.last_date = Some(flow.trade_date);

        HoldingsEstimate {
            trade_date: flow.trade_date,
            trust_shares_est: self.trust_anchor + self.trust_running,
            dealer_shares_est: self.dealer_anchor + self.dealer_running,
        }
    }
}

/// 以完整的買賣超序列估算每日持股，每個買賣超日期輸出一筆。
///
/// 輸入不需事先排序；同一日期重複出現時以最後提供的那筆為準。
pub fn estimate_holdings(flows: &[DailyFlow], baselines: &[Baseline]) -> Vec<HoldingsEstimate> {
    let flows = sort_flows(flows);
    let Some(first) = flows.first() else {
        return Vec::new();
    };

    let mut accumulator = HoldingsAccumulator::new(&first.security_code, baselines);

    // sort_flows 之後日期嚴格遞增，不會出現 OutOfOrderInput
    flows.iter().map(|flow| accumulator.advance(flow)).collect()
}

/// 持股比例(%)，發行股數未知或不大於零時為 `None`
pub fn share_ratio(shares: i64, total_shares: Option<i64>) -> Option<Decimal> {
    match total_shares {
        Some(total) if total > 0 => Some(Decimal::from(shares) / Decimal::from(total) * dec!(100)),
        _ => None,
    }
}

/// 依日期遞增排序，同日重複者保留最後提供的一筆
pub(crate) fn sort_flows(flows: &[DailyFlow]) -> Vec<DailyFlow> {
    let mut sorted = flows.to_vec();
    sorted.sort_by_key(|flow| flow.trade_date);
    dedup_keep_last(sorted, |flow| flow.trade_date)
}

pub(crate) fn sort_baselines(baselines: &[Baseline]) -> Vec<Baseline> {
    let mut sorted = baselines.to_vec();
    sorted.sort_by_key(|baseline| baseline.baseline_date);
    dedup_keep_last(sorted, |baseline| baseline.baseline_date)
}

/// `items` 須為穩定排序後的結果，相同鍵值時後面的覆蓋前面的
fn dedup_keep_last<T, F>(items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> NaiveDate,
{
    let mut result: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match result.last_mut() {
            Some(last) if key(last) == key(&item) => *last = item,
            _ => result.push(item),
        }
    }

    result
}
