//! 全域快取模組。
//!
//! [`SHARE`] 保存股票主檔(代號 → `stocks` 資料列)，ETL 與 API 以代號查詢 `stock_id` 時不必每次查資料庫。
//! 讀多寫少，以 `RwLock` 保護；取鎖失敗時回傳 `None`，由呼叫端改查資料庫。

use std::{collections::HashMap, sync::RwLock};

use once_cell::sync::Lazy;

use crate::{database::table::stock::Stock, logging};

pub static SHARE: Lazy<Share> = Lazy::new(Default::default);

pub struct Share {
    /// Key:股票代號
    stocks: RwLock<HashMap<String, Stock>>,
}

impl Share {
    pub fn new() -> Self {
        Share {
            stocks: RwLock::new(HashMap::new()),
        }
    }

    /// 從資料庫載入全部股票
    pub async fn load(&self) {
        match Stock::fetch().await {
            Ok(stocks) => {
                self.set_stocks(stocks);
                logging::info_file_async(format!("SHARE.stocks loaded {}", self.stock_count()));
            }
            Err(why) => {
                logging::error_file_async(format!("Failed to Share::load because {:?}", why));
            }
        }
    }

    pub fn get_stock(&self, code: &str) -> Option<Stock> {
        match self.stocks.read() {
            Ok(stocks) => stocks.get(code).cloned(),
            Err(why) => {
                logging::error_file_async(format!("Failed to stocks.read because {:?}", why));
                None
            }
        }
    }

    /// 新增或取代快取中的股票
    pub fn set_stocks(&self, items: Vec<Stock>) {
        match self.stocks.write() {
            Ok(mut stocks) => {
                for stock in items {
                    stocks.insert(stock.code.to_string(), stock);
                }
            }
            Err(why) => {
                logging::error_file_async(format!("Failed to stocks.write because {:?}", why));
            }
        }
    }

    pub fn stock_count(&self) -> usize {
        self.stocks.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for Share {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn stock(id: i32, code: &str, name: &str) -> Stock {
        Stock {
            id,
            code: code.to_string(),
            name: name.to_string(),
            market: "TWSE".to_string(),
            total_shares: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_set_stocks_replaces_by_code() {
        let share = Share::new();
        share.set_stocks(vec![stock(1, "2330", "台積"), stock(2, "2317", "鴻海")]);
        share.set_stocks(vec![stock(1, "2330", "台積電")]);

        assert_eq!(share.stock_count(), 2);
        assert_eq!(share.get_stock("2330").unwrap().name, "台積電");
        assert!(share.get_stock("9999").is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_load() {
        dotenv::dotenv().ok();
        SHARE.load().await;
        logging::debug_file_async(format!("stocks:{}", SHARE.stock_count()));
    }
}
