use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::registry::TaskRegistry;
use crate::registry::error::Result;
use crate::registry::task::{TaskId, TaskKind};
use crate::source::models::SourceSpec;

pub mod sim;

/// 传输驱动向引擎回报的唯一通道。每个任务只有启动它的驱动会调用，
/// 引擎只定义这份回调契约，不关心驱动内部如何传输
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report_progress(
        &self,
        id: TaskId,
        transferred_bytes: u64,
        size_bytes: Option<u64>,
        rate_bytes_per_sec: u64,
    ) -> Result<()>;

    async fn report_metadata(
        &self,
        id: TaskId,
        display_name: Option<&str>,
        size_bytes: Option<u64>,
    ) -> Result<()>;

    async fn report_completed(&self, id: TaskId) -> Result<()>;

    async fn report_failure(&self, id: TaskId, detail: &str) -> Result<()>;
}

#[async_trait]
impl ProgressSink for TaskRegistry {
    async fn report_progress(
        &self,
        id: TaskId,
        transferred_bytes: u64,
        size_bytes: Option<u64>,
        rate_bytes_per_sec: u64,
    ) -> Result<()> {
        TaskRegistry::report_progress(self, id, transferred_bytes, size_bytes, rate_bytes_per_sec)
            .await
    }

    async fn report_metadata(
        &self,
        id: TaskId,
        display_name: Option<&str>,
        size_bytes: Option<u64>,
    ) -> Result<()> {
        TaskRegistry::report_metadata(self, id, display_name, size_bytes).await
    }

    async fn report_completed(&self, id: TaskId) -> Result<()> {
        TaskRegistry::report_completed(self, id).await
    }

    async fn report_failure(&self, id: TaskId, detail: &str) -> Result<()> {
        TaskRegistry::report_failure(self, id, detail).await
    }
}

// --------------------------------------------------------------------

/// 驱动启动时拿到的全部上下文
pub struct DriverContext {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub source: SourceSpec,
    pub cancel: CancellationToken, // 合作式取消信号
    pub sink: Arc<dyn ProgressSink>,
}

/// 实际执行传输的后端驱动。真实实现（HTTP 分块、BT 协议、社媒提取）
/// 是外部协作方，仓库内只带一个模拟驱动用于演示和测试
#[async_trait]
pub trait TransferDriver: Send + Sync {
    async fn transfer(&self, ctx: DriverContext) -> Result<()>;
}
