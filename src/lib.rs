//! 多来源下载任务引擎：统一管理直链 / 种子 / 社媒提取任务的
//! 生命周期、进度聚合与事件通知。真实的传输由外部驱动完成，
//! 引擎只定义驱动回报进度的契约。

pub mod common;
pub mod driver;
pub mod registry;
pub mod source;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
