use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{DriverContext, ProgressSink, TransferDriver};
use crate::source::models::{InitialMetadata, SourceInput};

pub mod engine;
pub mod error;
pub mod events;
pub mod stats;
pub mod task;

pub use self::engine::TaskRegistry;

use self::error::Result;
use self::task::{TaskId, TaskKind, TaskSnapshot};

/// 注册表与传输驱动的装配层：提交任务并在并发额度内派发驱动。
/// 许可未到手前任务保持排队状态
pub struct DownloadHub {
    registry: TaskRegistry,
    semaphore: Arc<Semaphore>, // 控制并发传输数
    drivers: HashMap<TaskKind, Arc<dyn TransferDriver>>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DownloadHub {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            registry: TaskRegistry::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            drivers: HashMap::new(),
            handles: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// 注册某一来源类型的传输驱动，后注册的覆盖先注册的
    pub fn register_driver(&mut self, kind: TaskKind, driver: Arc<dyn TransferDriver>) {
        self.drivers.insert(kind, driver);
    }

    /// 新增任务并派发对应类型的驱动
    pub async fn submit(
        &self,
        kind: TaskKind,
        input: &SourceInput,
        metadata: Option<InitialMetadata>,
    ) -> Result<TaskSnapshot> {
        let snapshot = self.registry.add_task(kind, input, metadata).await?;
        self.dispatch(&snapshot).await?;
        Ok(snapshot)
    }

    /// 失败任务重试并重新派发驱动
    pub async fn retry(&self, id: TaskId) -> Result<TaskSnapshot> {
        let snapshot = self.registry.retry(id).await?;
        self.dispatch(&snapshot).await?;
        Ok(snapshot)
    }

    async fn dispatch(&self, snapshot: &TaskSnapshot) -> Result<()> {
        let Some(driver) = self.drivers.get(&snapshot.kind) else {
            warn!(
                "类型 {:?} 未注册驱动，任务 {} 停留在排队状态",
                snapshot.kind, snapshot.id
            );
            return Ok(());
        };

        let driver = Arc::clone(driver);
        let semaphore = Arc::clone(&self.semaphore);
        let id = snapshot.id;
        let kind = snapshot.kind;
        let source = self.registry.source(id).await?;
        let cancel = self.registry.cancel_token(id).await?;
        let sink: Arc<dyn ProgressSink> = Arc::new(self.registry.clone());

        let handle = tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // 信号量已关闭
            };
            // 排队期间任务可能已被取消或移除
            if cancel.is_cancelled() {
                debug!("任务 {} 在排队期间被取消，不再启动驱动", id);
                return;
            }
            let ctx = DriverContext {
                task_id: id,
                kind,
                source,
                cancel,
                sink,
            };
            if let Err(e) = driver.transfer(ctx).await {
                warn!("任务 {} 驱动执行异常: {}", id, e);
            }
        });
        self.handles.lock().await.push(handle);
        Ok(())
    }

    /// 等待所有已派发的驱动结束（演示与测试用）
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().await;
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}
