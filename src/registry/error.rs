use thiserror::Error;

use super::task::{TaskId, TaskStatus};
use crate::source::errors::SourceError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("任务不存在: {0}")]
    NotFound(TaskId),

    #[error("任务 {id} 当前状态 {status:?} 不允许该操作")]
    InvalidTransition { id: TaskId, status: TaskStatus },

    #[error("下载来源无效: {0}")]
    MissingSource(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
