use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("来源不能为空")]
    Empty,

    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    #[error("无效的磁力链接: {0}")]
    InvalidMagnet(String),

    #[error("种子文件引用无效: {0}")]
    InvalidTorrentFile(String),

    #[error("磁力链接与种子文件只能二选一")]
    AmbiguousTorrentInput,

    #[error("缺少磁力链接或种子文件")]
    MissingTorrentInput,

    #[error("不支持的社媒平台: {0}")]
    UnsupportedPlatform(String),
}
