//! 組合外資持股、投信/自營商估算持股，產生每日法人持股比例並重新計算回溯變化。

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use futures::{stream, StreamExt};
use rayon::prelude::*;
use tokio::task;

use crate::{
    calculation::{
        holdings::{self, share_ratio},
        ratio_change,
        record::{Baseline, DailyFlow, ForeignHolding, InstitutionalRatio, Security},
    },
    error::CalculationError,
    logging, util,
};

/// 單一股票計算所需的完整歷史
#[derive(Debug, Clone)]
pub struct SecurityHistory {
    pub security: Security,
    pub flows: Vec<DailyFlow>,
    pub baselines: Vec<Baseline>,
    pub foreign_holdings: Vec<ForeignHolding>,
}

/// 單一股票的計算結果
#[derive(Debug, Clone)]
pub struct RatioOutcome {
    pub security_code: String,
    /// 依日期遞增
    pub rows: Vec<InstitutionalRatio>,
    /// 不影響其他欄位的問題，例如缺少發行股數
    pub issues: Vec<CalculationError>,
}

/// 讀取歷史與寫回結果的儲存層
#[async_trait]
pub trait RatioStore: Send + Sync {
    /// 讀取一檔股票一致的完整歷史
    async fn load_history(&self, security: &Security) -> Result<SecurityHistory>;

    /// 以 (股票, 日期) upsert 計算結果
    async fn save_ratios(&self, security: &Security, rows: &[InstitutionalRatio]) -> Result<()>;
}

/// 重新計算的統計
#[derive(Debug, Default)]
pub struct RecomputeSummary {
    pub securities: usize,
    pub rows: usize,
    pub missing_denominator: usize,
    pub failures: Vec<CalculationError>,
}

/// 依單一股票的歷史產生每個買賣超日期的持股比例
pub fn compose(history: &SecurityHistory) -> RatioOutcome {
    let code = &history.security.code;
    let estimates = holdings::estimate_holdings(&history.flows, &history.baselines);

    let mut foreign_holdings = history.foreign_holdings.clone();
    foreign_holdings.sort_by_key(|holding| holding.trade_date);

    let mut rows = Vec::with_capacity(estimates.len());
    let mut issues = Vec::new();
    let mut cursor = 0;
    let mut holding: Option<&ForeignHolding> = None;

    for estimate in estimates {
        // 外資持股沿用最近一筆(日期 <= 當日)的公布資料
        while let Some(next) = foreign_holdings.get(cursor) {
            if next.trade_date > estimate.trade_date {
                break;
            }
            holding = Some(next);
            cursor += 1;
        }

        let total_shares = holding
            .and_then(|h| h.total_shares)
            .filter(|total| *total > 0)
            .or(history.security.total_shares);

        let mut row = InstitutionalRatio::new(code.to_string(), estimate.trade_date);
        row.foreign_ratio = holding.and_then(|h| {
            h.foreign_ratio.or_else(|| {
                h.foreign_shares
                    .and_then(|shares| share_ratio(shares, h.total_shares))
            })
        });
        row.trust_shares_est = Some(estimate.trust_shares_est);
        row.dealer_shares_est = Some(estimate.dealer_shares_est);
        row.trust_ratio_est = share_ratio(estimate.trust_shares_est, total_shares);
        row.dealer_ratio_est = share_ratio(estimate.dealer_shares_est, total_shares);

        if row.trust_ratio_est.is_none() {
            issues.push(CalculationError::MissingDenominator {
                code: code.to_string(),
                date: estimate.trade_date,
            });
        }

        row.three_inst_ratio_est = match (row.foreign_ratio, row.trust_ratio_est, row.dealer_ratio_est) {
            (Some(foreign), Some(trust), Some(dealer)) => Some(foreign + trust + dealer),
            _ => None,
        };

        rows.push(row);
    }

    ratio_change::fill_changes(&mut rows);

    RatioOutcome {
        security_code: code.to_string(),
        rows,
        issues,
    }
}

/// 平行計算多檔股票，彼此互不影響
pub fn compose_all(histories: &[SecurityHistory]) -> Vec<RatioOutcome> {
    histories.par_iter().map(compose).collect()
}

/// 讀取 → 計算 → 寫回。
///
/// 每檔股票各自成功或失敗，失敗者記錄在 `failures`，下次執行時再重算即可。
pub async fn recompute<S: RatioStore>(store: &S, securities: Vec<Security>) -> RecomputeSummary {
    let today = Local::now().date_naive();
    let limit = util::concurrent_limit_16().unwrap_or(4);
    let failures = Mutex::new(Vec::new());

    let histories: Vec<SecurityHistory> = stream::iter(securities)
        .map(|security| async move {
            store
                .load_history(&security)
                .await
                .map_err(|why| CalculationError::Store {
                    code: security.code.to_string(),
                    date: today,
                    message: format!("{:?}", why),
                })
        })
        .buffer_unordered(limit)
        .filter_map(|result| {
            let history = match result {
                Ok(history) => Some(history),
                Err(why) => {
                    if let Ok(mut f) = failures.lock() {
                        f.push(why);
                    }
                    None
                }
            };
            async move { history }
        })
        .collect()
        .await;

    let mut summary = RecomputeSummary {
        securities: histories.len(),
        ..Default::default()
    };

    let outcomes = match task::spawn_blocking(move || {
        let outcomes = compose_all(&histories);
        histories
            .into_iter()
            .map(|history| history.security)
            .zip(outcomes)
            .collect::<Vec<(Security, RatioOutcome)>>()
    })
    .await
    {
        Ok(outcomes) => outcomes,
        Err(why) => {
            logging::error_file_async(format!("Failed to compose ratios because {:?}", why));
            summary.failures = failures.into_inner().unwrap_or_default();
            return summary;
        }
    };

    for (_, outcome) in &outcomes {
        summary.rows += outcome.rows.len();
        summary.missing_denominator += outcome
            .issues
            .iter()
            .filter(|issue| matches!(issue, CalculationError::MissingDenominator { .. }))
            .count();
    }

    let save_failures: Vec<CalculationError> = stream::iter(outcomes)
        .map(|(security, outcome)| async move {
            let last_date = outcome.rows.last().map(|row| row.trade_date).unwrap_or(today);
            store
                .save_ratios(&security, &outcome.rows)
                .await
                .map_err(|why| CalculationError::Store {
                    code: security.code.to_string(),
                    date: last_date,
                    message: format!("{:?}", why),
                })
        })
        .buffer_unordered(limit)
        .filter_map(|result| async move { result.err() })
        .collect()
        .await;

    summary.failures = failures.into_inner().unwrap_or_default();
    summary.failures.extend(save_failures);

    summary
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use anyhow::anyhow;
    use chrono::{Days, NaiveDate};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::declare::Market;

    fn day(n: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap() + Days::new(n)
    }

    fn security(code: &str, total_shares: Option<i64>) -> Security {
        Security {
            code: code.to_string(),
            name: code.to_string(),
            market: Market::Twse,
            total_shares,
            is_active: true,
        }
    }

    fn history(code: &str, total_shares: Option<i64>, trust: &[i64]) -> SecurityHistory {
        SecurityHistory {
            security: security(code, total_shares),
            flows: trust
                .iter()
                .enumerate()
                .map(|(i, net)| DailyFlow {
                    security_code: code.to_string(),
                    trade_date: day(i as u64),
                    foreign_net: 0,
                    trust_net: *net,
                    dealer_net: 0,
                })
                .collect(),
            baselines: vec![],
            foreign_holdings: vec![],
        }
    }

    #[test]
    fn test_compose_sums_three_ratios() {
        let mut h = history("2330", Some(1_000_000), &[100, -50, 200, 0, 300]);
        h.foreign_holdings = vec![ForeignHolding {
            security_code: "2330".to_string(),
            trade_date: day(0),
            total_shares: Some(1_000_000),
            foreign_shares: Some(700_000),
            foreign_ratio: Some(dec!(70)),
        }];

        let outcome = compose(&h);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.rows.len(), 5);

        let last = &outcome.rows[4];
        assert_eq!(last.foreign_ratio, Some(dec!(70)));
        assert_eq!(last.trust_ratio_est, Some(dec!(0.055)));
        assert_eq!(last.dealer_ratio_est, Some(Decimal::ZERO));
        assert_eq!(last.three_inst_ratio_est, Some(dec!(70.055)));
        assert_eq!(last.changes.change_5d, None);
    }

    #[test]
    fn test_compose_change_5d_from_baseline() {
        let mut h = history("2330", Some(1_000_000), &[100, 200, 300, 400, 500, 600, 700]);
        h.baselines = vec![Baseline {
            security_code: "2330".to_string(),
            baseline_date: day(0),
            trust_shares_base: 10_000,
            dealer_shares_base: 5_000,
        }];
        h.foreign_holdings = vec![ForeignHolding {
            security_code: "2330".to_string(),
            trade_date: day(0),
            total_shares: Some(1_000_000),
            foreign_shares: Some(400_000),
            foreign_ratio: Some(dec!(40)),
        }];

        let outcome = compose(&h);
        assert_eq!(outcome.rows.len(), 7);

        // day0 為基準日︰40 + 1 + 0.5
        assert_eq!(outcome.rows[0].three_inst_ratio_est, Some(dec!(41.5)));
        assert_eq!(outcome.rows[0].trust_shares_est, Some(10_000));
        // day5︰投信 10000 + 200 + 300 + 400 + 500 + 600 = 12000
        assert_eq!(outcome.rows[5].trust_shares_est, Some(12_000));
        assert_eq!(outcome.rows[5].three_inst_ratio_est, Some(dec!(41.7)));
        assert_eq!(outcome.rows[4].changes.change_5d, None);
        assert_eq!(outcome.rows[5].changes.change_5d, Some(dec!(0.2)));
        // day6︰12700 股，對 day1(10200 股)
        assert_eq!(outcome.rows[6].changes.change_5d, Some(dec!(0.25)));
        assert_eq!(outcome.rows[6].changes.change_20d, None);
    }

    #[test]
    fn test_tpex_daily_holdings_define_long_windows() {
        let mut h = history("6488", Some(500_000_000), &[0; 61]);
        h.security.market = Market::Tpex;
        h.foreign_holdings = (0..61)
            .map(|i| ForeignHolding {
                security_code: "6488".to_string(),
                trade_date: day(i),
                total_shares: Some(500_000_000),
                foreign_shares: None,
                foreign_ratio: Some(Decimal::from(30 + i / 10)),
            })
            .collect();

        let last = compose(&h).rows.pop().unwrap();
        assert_eq!(last.three_inst_ratio_est, Some(dec!(36)));
        assert_eq!(last.changes.change_5d, Some(dec!(1)));
        assert_eq!(last.changes.change_20d, Some(dec!(2)));
        assert_eq!(last.changes.change_60d, Some(dec!(6)));
        assert_eq!(last.changes.change_120d, None);
    }

    #[test]
    fn test_missing_denominator_leaves_ratio_undefined() {
        let outcome = compose(&history("9999", None, &[10, 20]));

        assert_eq!(outcome.issues.len(), 2);
        assert!(matches!(
            outcome.issues[0],
            CalculationError::MissingDenominator { .. }
        ));
        assert_eq!(outcome.rows[1].trust_shares_est, Some(30));
        assert_eq!(outcome.rows[1].trust_ratio_est, None);
        assert_eq!(outcome.rows[1].three_inst_ratio_est, None);
    }

    #[test]
    fn test_foreign_ratio_forward_filled_and_derived_from_shares() {
        let mut h = history("2317", Some(1000), &[0, 0, 0]);
        h.foreign_holdings = vec![ForeignHolding {
            security_code: "2317".to_string(),
            trade_date: day(1),
            total_shares: Some(2000),
            foreign_shares: Some(500),
            foreign_ratio: None,
        }];

        let outcome = compose(&h);
        assert_eq!(outcome.rows[0].foreign_ratio, None);
        assert_eq!(outcome.rows[1].foreign_ratio, Some(dec!(25)));
        assert_eq!(outcome.rows[2].foreign_ratio, Some(dec!(25)));
    }

    #[test]
    fn test_compose_all_is_idempotent() {
        let histories = vec![
            history("2330", Some(1_000_000), &[1, 2, 3, 4, 5, 6, 7]),
            history("6488", Some(50_000), &[-9, 8, -7, 6, -5, 4, -3]),
        ];
        let first: Vec<Vec<InstitutionalRatio>> =
            compose_all(&histories).into_iter().map(|o| o.rows).collect();
        let second: Vec<Vec<InstitutionalRatio>> =
            compose_all(&histories).into_iter().map(|o| o.rows).collect();
        assert_eq!(first, second);
    }

    struct MemoryStore {
        histories: HashMap<String, SecurityHistory>,
        saved: Mutex<HashMap<String, Vec<InstitutionalRatio>>>,
    }

    #[async_trait]
    impl RatioStore for MemoryStore {
        async fn load_history(&self, security: &Security) -> Result<SecurityHistory> {
            self.histories
                .get(&security.code)
                .cloned()
                .ok_or_else(|| anyhow!("no history for {}", security.code))
        }

        async fn save_ratios(&self, security: &Security, rows: &[InstitutionalRatio]) -> Result<()> {
            if security.code == "0000" {
                return Err(anyhow!("disk full"));
            }
            self.saved
                .lock()
                .unwrap()
                .insert(security.code.to_string(), rows.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recompute_isolates_failures() {
        let mut histories = HashMap::new();
        for h in [
            history("2330", Some(1_000_000), &[1, 2, 3]),
            history("0000", Some(10), &[1]),
        ] {
            histories.insert(h.security.code.to_string(), h);
        }
        let store = MemoryStore {
            histories,
            saved: Mutex::new(HashMap::new()),
        };

        let summary = recompute(
            &store,
            vec![
                security("2330", Some(1_000_000)),
                security("0000", Some(10)),
                security("1234", Some(10)),
            ],
        )
        .await;

        assert_eq!(summary.securities, 2);
        assert_eq!(summary.rows, 4);
        assert_eq!(summary.missing_denominator, 0);
        let mut failed: Vec<&str> = summary.failures.iter().map(|f| f.code()).collect();
        failed.sort();
        assert_eq!(failed, vec!["0000", "1234"]);

        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved["2330"][2].trust_shares_est, Some(6));
    }

    #[tokio::test]
    async fn test_recompute_counts_missing_denominator_days() {
        let mut histories = HashMap::new();
        for h in [
            history("2330", Some(1_000_000), &[1, 2, 3]),
            history("9999", None, &[10, 20]),
        ] {
            histories.insert(h.security.code.to_string(), h);
        }
        let store = MemoryStore {
            histories,
            saved: Mutex::new(HashMap::new()),
        };

        let summary = recompute(
            &store,
            vec![
                security("2330", Some(1_000_000)),
                security("9999", None),
                security("1234", Some(10)),
            ],
        )
        .await;

        assert_eq!(summary.rows, 5);
        assert_eq!(summary.missing_denominator, 2);
        // 讀取失敗是 Store 錯誤，不算在缺少發行股數內
        assert_eq!(summary.failures.len(), 1);
    }
}
