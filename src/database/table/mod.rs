/// 外資持股
pub mod foreign_holding;
/// 券商分點進出
pub mod broker_trade;
/// 投信、自營商基準持股
pub mod institutional_baseline;
/// 三大法人買賣超
pub mod institutional_flow;
/// 法人持股比例
pub mod institutional_ratio;
/// 股票基本資料
pub mod stock;
/// 每日收盤行情
pub mod stock_price;
/// 排程狀態
pub mod system_status;

use std::hash::Hash;

use chrono::NaiveDate;
use hashbrown::HashMap;

/// 以 (stock_id, 日期) 去除重複
pub(crate) fn dedup_by_stock_date<T, F>(items: &[T], key: F) -> Vec<&T>
where
    F: Fn(&T) -> (i32, NaiveDate),
{
    dedup_by_key(items, key)
}

/// 同一批 upsert 內不能出現重複的唯一鍵，保留最後一筆
pub(crate) fn dedup_by_key<T, K, F>(items: &[T], key: F) -> Vec<&T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(items.len());
    let mut result: Vec<&T> = Vec::with_capacity(items.len());

    for item in items {
        match positions.get(&key(item)) {
            Some(&index) => result[index] = item,
            None => {
                positions.insert(key(item), result.len());
                result.push(item);
            }
        }
    }

    result
}
