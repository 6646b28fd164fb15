/// 法人持股比例 ETL
pub mod institutional;
/// 券商分點進出 ETL
pub mod broker;
