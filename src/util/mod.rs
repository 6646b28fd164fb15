use std::cmp::max;

pub mod convert;
pub mod datetime;
pub mod http;
pub mod text;

/// 讀寫資料庫等 I/O 的並行上限
pub fn concurrent_limit_16() -> Option<usize> {
    Some(max(16, num_cpus::get() * 4))
}
