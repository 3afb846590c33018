use clap::{Parser, ValueEnum};

use omni_downloader::registry::task::TaskKind;

/// 多来源下载管理器
#[derive(Parser, Debug)]
#[command(name = "omnidl")]
#[command(version = "0.1.0")]
#[command(about = "一个多来源下载任务管理演示工具", long_about = None)]
pub struct Cli {
    /// 下载来源 (URL 或磁力链接)，可指定多个
    #[arg(value_name = "SOURCE")]
    pub sources: Vec<String>,

    /// 来源类型
    #[arg(long, value_enum, default_value_t = KindArg::Direct)]
    pub kind: KindArg,

    /// 种子描述文件路径 (与磁力链接二选一)
    #[arg(long, value_name = "FILE")]
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub torrent_file: Option<String>,

    #[arg(long, value_name = "并发数", default_value_t = 3)]
    pub concurrency: usize,

    /// 模拟传输的时间片 (毫秒)
    #[arg(long, default_value_t = 200)]
    pub tick_ms: u64,

    /// 以JSON输出最终任务快照
    #[arg(long)]
    pub json: bool,

    /// 输出调试日志
    #[arg(long)]
    pub verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum KindArg {
    Direct,
    Torrent,
    Social,
}

impl From<KindArg> for TaskKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Direct => TaskKind::Direct,
            KindArg::Torrent => TaskKind::Torrent,
            KindArg::Social => TaskKind::Social,
        }
    }
}
