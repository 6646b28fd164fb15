/// 台股
pub mod taiwan_stock;
