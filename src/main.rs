use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use omni_downloader::common::format::{format_bytes, format_rate};
use omni_downloader::common::logger::PrettyLogger;
use omni_downloader::driver::sim::SimDriver;
use omni_downloader::registry::DownloadHub;
use omni_downloader::registry::events::TaskEvent;
use omni_downloader::registry::task::{TaskFilter, TaskId, TaskKind, TaskStatus};
use omni_downloader::source::models::SourceInput;
use omni_downloader::{Result, log_info, log_step, log_success, log_warning};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = cli::Cli::parse();

    // 初始化日志
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if args.sources.is_empty() && args.torrent_file.is_none() {
        return Err("未提供任何下载来源".into());
    }

    // 组装注册表、并发额度与模拟驱动
    let mut hub = DownloadHub::new(args.concurrency);
    let sim = Arc::new(
        SimDriver::new(hub.registry().clone()).with_tick(Duration::from_millis(args.tick_ms)),
    );
    for kind in [TaskKind::Direct, TaskKind::Torrent, TaskKind::Social] {
        hub.register_driver(kind, sim.clone());
    }

    // 先订阅再提交，避免漏掉事件
    let mut events = hub.registry().subscribe();

    log_step!("提交下载任务");
    let kind: TaskKind = args.kind.into();
    for source in &args.sources {
        let snapshot = hub.submit(kind, &SourceInput::url(source), None).await?;
        PrettyLogger::task_info(&snapshot.display_name, format!("{:?}", snapshot.kind));
    }
    if let Some(path) = &args.torrent_file {
        let snapshot = hub
            .submit(TaskKind::Torrent, &SourceInput::torrent_file(path), None)
            .await?;
        PrettyLogger::task_info(&snapshot.display_name, "Torrent");
    }

    // 基于事件流驱动进度条，直到没有进行中或排队中的任务
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template(
        "{spinner:.green} {prefix} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )?
    .progress_chars("#>-");
    let mut bars: HashMap<TaskId, ProgressBar> = HashMap::new();

    loop {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(event)) => handle_event(event, &multi, &style, &mut bars),
            Ok(Err(RecvError::Lagged(skipped))) => {
                log_warning!("事件积压，跳过 {} 条", skipped);
            }
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {} // 超时则检查是否全部结束
        }
        if hub.registry().stats().await.is_idle() {
            break;
        }
    }
    hub.join().await;

    // 汇总
    let snapshots = hub.registry().list(TaskFilter::All).await;
    let stats = hub.registry().stats().await;
    PrettyLogger::separator();
    PrettyLogger::title("下载汇总");
    for snapshot in &snapshots {
        let status = match snapshot.status {
            TaskStatus::Completed => "已完成".green(),
            TaskStatus::Error => "失败".red(),
            TaskStatus::Canceled => "已取消".yellow(),
            TaskStatus::Paused => "已暂停".yellow(),
            TaskStatus::Active => "下载中".cyan(),
            TaskStatus::Queued => "排队中".normal(),
        };
        println!(
            "  {} {} {} {}",
            status,
            snapshot.display_name.bold(),
            format_bytes(snapshot.transferred_bytes),
            snapshot.error_detail.clone().unwrap_or_default().red()
        );
    }
    PrettyLogger::separator();
    log_info!(
        "完成 {} 个，失败 {} 个，共传输 {}",
        stats.num_completed,
        stats.num_error,
        format_bytes(stats.transferred_bytes)
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }
    log_success!("全部任务处理完毕");
    Ok(())
}

/// 把注册表事件映射到进度条
fn handle_event(
    event: TaskEvent,
    multi: &MultiProgress,
    style: &ProgressStyle,
    bars: &mut HashMap<TaskId, ProgressBar>,
) {
    match event {
        TaskEvent::TaskAdded { snapshot } => {
            let bar = multi.add(ProgressBar::new(snapshot.size_bytes.unwrap_or(0)));
            bar.set_style(style.clone());
            bar.set_prefix(snapshot.display_name.clone());
            bars.insert(snapshot.id, bar);
        }
        TaskEvent::Progress {
            id,
            transferred_bytes,
            size_bytes,
            rate_bytes_per_sec,
        } => {
            if let Some(bar) = bars.get(&id) {
                if let Some(size) = size_bytes {
                    bar.set_length(size);
                }
                bar.set_position(transferred_bytes);
                bar.set_message(format_rate(rate_bytes_per_sec));
            }
        }
        TaskEvent::StatusChanged { id, status } => {
            if let Some(bar) = bars.get(&id) {
                match status {
                    TaskStatus::Completed => bar.finish_with_message("下载完成"),
                    TaskStatus::Error => bar.abandon_with_message("下载失败"),
                    TaskStatus::Canceled => bar.abandon_with_message("已取消"),
                    _ => {}
                }
            }
        }
        TaskEvent::TaskRemoved { id } => {
            if let Some(bar) = bars.remove(&id) {
                bar.finish_and_clear();
            }
        }
    }
}
