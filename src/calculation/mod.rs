/// 投信、自營商持股估算
pub mod holdings;
/// 組合每日法人持股比例
pub mod institutional_ratio;
/// 依比例變化排行
pub mod ranking;
/// 比例的回溯變化
pub mod ratio_change;
/// 估算使用的資料列
pub mod record;
