use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use super::{DriverContext, TransferDriver};
use crate::registry::TaskRegistry;
use crate::registry::error::{RegistryError, Result};
use crate::registry::task::{TaskKind, TaskStatus};
use crate::source::models::SourceSpec;

// 模拟传输大致切成的份数
const CHUNK_DIVISOR: u64 = 20;
// 种子任务先经历几个时间片的元数据交换
const METADATA_TICKS: u64 = 2;
// 大小未知的社媒流跑满几个时间片后发显式完结信号
const SOCIAL_TICKS: u64 = 10;

/// 模拟传输驱动：按时间片推进假进度，观察暂停、响应取消。
/// 用于演示与集成测试，真实传输驱动是外部协作方
pub struct SimDriver {
    registry: TaskRegistry,
    tick: Duration,
    default_size_bytes: u64,
    fail_after_ticks: Option<u64>,
}

impl SimDriver {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry,
            tick: Duration::from_millis(200),
            default_size_bytes: 64 * 1024 * 1024,
            fail_after_ticks: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_default_size(mut self, size_bytes: u64) -> Self {
        self.default_size_bytes = size_bytes;
        self
    }

    /// 在第 N 个时间片上报失败，用于演练错误与重试路径
    pub fn with_failure_after(mut self, ticks: u64) -> Self {
        self.fail_after_ticks = Some(ticks);
        self
    }

    /// 元数据交换后得到的"真实"文件名
    fn resolved_name(source: &SourceSpec) -> Option<String> {
        match source {
            SourceSpec::Magnet {
                display_name: Some(name),
                ..
            } => Some(name.clone()),
            SourceSpec::Magnet { info_hash, .. } => {
                Some(format!("torrent-{}.bin", &info_hash[..8.min(info_hash.len())]))
            }
            SourceSpec::TorrentFile { .. } => Some(format!("{}.bin", source.display_name())),
            _ => None,
        }
    }
}

/// 上报被拒说明任务已经走到我们管不着的状态（移除 / 终态），驱动就地收工
fn should_stop(err: &RegistryError) -> bool {
    matches!(
        err,
        RegistryError::NotFound(_) | RegistryError::InvalidTransition { .. }
    )
}

#[async_trait]
impl TransferDriver for SimDriver {
    async fn transfer(&self, ctx: DriverContext) -> Result<()> {
        // 直链视同 HEAD 请求拿到了 Content-Length；种子要等元数据交换；
        // 社媒提取的流大小未知
        let mut size_bytes: Option<u64> = match ctx.kind {
            TaskKind::Direct => Some(self.default_size_bytes),
            TaskKind::Torrent | TaskKind::Social => None,
        };
        let base_chunk = (self.default_size_bytes / CHUNK_DIVISOR).max(1);
        let tick_ms = self.tick.as_millis().max(1) as u64;

        let mut transferred = 0u64;
        let mut ticks = 0u64;
        let mut interval = tokio::time::interval(self.tick);
        info!("开始模拟传输: {} ({:?})", ctx.task_id, ctx.kind);

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    debug!("任务 {} 收到取消信号，停止模拟传输", ctx.task_id);
                    return Ok(());
                }
                _ = interval.tick() => {}
            }
            ticks += 1;

            // 合作式暂停：暂停期间不推进也不上报，等恢复
            match self.registry.get(ctx.task_id).await {
                Ok(snap) if snap.status == TaskStatus::Paused => continue,
                Ok(snap) if snap.status.is_terminal() || snap.status == TaskStatus::Error => {
                    return Ok(());
                }
                Ok(_) => {}
                Err(_) => return Ok(()), // 任务已被移除
            }

            if let Some(fail_after) = self.fail_after_ticks {
                if ticks >= fail_after {
                    match ctx.sink.report_failure(ctx.task_id, "模拟传输失败").await {
                        Ok(()) => {}
                        Err(e) if should_stop(&e) => {}
                        Err(e) => return Err(e),
                    }
                    return Ok(());
                }
            }

            // 种子任务的元数据交换：拿到真实文件名和总大小后才开始出数据
            if ctx.kind == TaskKind::Torrent && size_bytes.is_none() {
                if ticks < METADATA_TICKS {
                    continue;
                }
                size_bytes = Some(self.default_size_bytes);
                let resolved = Self::resolved_name(&ctx.source);
                match ctx
                    .sink
                    .report_metadata(ctx.task_id, resolved.as_deref(), size_bytes)
                    .await
                {
                    Ok(()) => {}
                    Err(e) if should_stop(&e) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }

            let jitter = {
                let mut rng = rand::rng();
                rng.random_range(70..=130)
            };
            let chunk = base_chunk * jitter / 100;
            transferred += chunk;
            let rate = chunk * 1000 / tick_ms;

            match ctx
                .sink
                .report_progress(ctx.task_id, transferred, size_bytes, rate)
                .await
            {
                Ok(()) => {}
                Err(e) if should_stop(&e) => return Ok(()),
                Err(e) => return Err(e),
            }

            match size_bytes {
                // 传满后注册表已自动完结
                Some(size) if transferred >= size => return Ok(()),
                Some(_) => {}
                None if ticks >= SOCIAL_TICKS => {
                    // 大小未知的流靠显式完结信号收尾
                    match ctx.sink.report_completed(ctx.task_id).await {
                        Ok(()) => {}
                        Err(e) if should_stop(&e) => {}
                        Err(e) => return Err(e),
                    }
                    return Ok(());
                }
                None => {}
            }
        }
    }
}
