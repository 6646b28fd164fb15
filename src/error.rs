use chrono::NaiveDate;
use thiserror::Error;

use crate::declare::ChangeWindow;

/// 持股估算與比例計算過程中的錯誤
///
/// 每個錯誤都帶有股票代號與日期，「未定義」的數值仍以 `None` 表示，
/// 這裡只負責說明為什麼是 `None`，或為什麼該檔股票的計算失敗。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalculationError {
    /// 發行股數不存在或為零
    #[error("{code} {date}: total shares is missing or zero, ratio left undefined")]
    MissingDenominator { code: String, date: NaiveDate },

    /// 歷史筆數不足 W+1 筆
    #[error("{code} {date}: {available} rows available, {window}-day change needs {required}")]
    InsufficientHistory {
        code: String,
        date: NaiveDate,
        window: ChangeWindow,
        available: usize,
        required: usize,
    },

    /// 視窗兩端有一端的比例本身是未定義
    #[error("{code} {date}: ratio at one end of the {window}-day window is undefined")]
    UndefinedRatio {
        code: String,
        date: NaiveDate,
        window: ChangeWindow,
    },

    /// 資料日期早於(或等於)已處理過的日期
    #[error("{code} {date}: input is not after the last processed date {last}")]
    OutOfOrderInput {
        code: String,
        date: NaiveDate,
        last: NaiveDate,
    },

    /// 上游資料來源抓取失敗
    #[error("{code} {date}: upstream fetch from {source_name} failed: {message}")]
    UpstreamFetch {
        code: String,
        date: NaiveDate,
        source_name: String,
        message: String,
    },

    /// 讀寫資料庫失敗
    #[error("{code} {date}: store failure: {message}")]
    Store {
        code: String,
        date: NaiveDate,
        message: String,
    },
}

impl CalculationError {
    /// 受影響的股票代號
    pub fn code(&self) -> &str {
        match self {
            CalculationError::MissingDenominator { code, .. }
            | CalculationError::InsufficientHistory { code, .. }
            | CalculationError::UndefinedRatio { code, .. }
            | CalculationError::OutOfOrderInput { code, .. }
            | CalculationError::UpstreamFetch { code, .. }
            | CalculationError::Store { code, .. } => code,
        }
    }

    /// 受影響的日期
    pub fn date(&self) -> NaiveDate {
        match self {
            CalculationError::MissingDenominator { date, .. }
            | CalculationError::InsufficientHistory { date, .. }
            | CalculationError::UndefinedRatio { date, .. }
            | CalculationError::OutOfOrderInput { date, .. }
            | CalculationError::UpstreamFetch { date, .. }
            | CalculationError::Store { date, .. } => *date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let why = CalculationError::InsufficientHistory {
            code: "2330".to_string(),
            date,
            window: ChangeWindow::D5,
            available: 3,
            required: 6,
        };

        assert_eq!(why.code(), "2330");
        assert_eq!(why.date(), date);
        assert_eq!(
            why.to_string(),
            "2330 2024-05-02: 3 rows available, 5-day change needs 6"
        );
    }
}
