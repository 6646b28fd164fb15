/// 個股券商分點進出
pub mod broker_trade;

const HOST: &str = "fubon-ebrokerdj.fbs.com.tw";
