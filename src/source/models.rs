use std::path::Path;

use url::Url;

use crate::registry::task::TaskKind;

/// 支持的社媒平台
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Youtube,
    Twitter,
    Instagram,
    Tiktok,
    Bilibili,
}

impl Platform {
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Youtube => "YouTube",
            Platform::Twitter => "Twitter",
            Platform::Instagram => "Instagram",
            Platform::Tiktok => "TikTok",
            Platform::Bilibili => "Bilibili",
        }
    }
}

// --------------------------------------------------------------------

/// 新增任务时的原始输入：URL 或上传的种子描述文件引用
#[derive(Debug, Clone, Default)]
pub struct SourceInput {
    pub url: Option<String>,
    pub torrent_file: Option<String>,
}

impl SourceInput {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            torrent_file: None,
        }
    }

    pub fn torrent_file(path: impl Into<String>) -> Self {
        Self {
            url: None,
            torrent_file: Some(path.into()),
        }
    }
}

/// 创建任务时可选的初始元数据
#[derive(Debug, Clone, Default)]
pub struct InitialMetadata {
    pub display_name: Option<String>,
    pub size_bytes: Option<u64>,
}

// --------------------------------------------------------------------

/// 校验通过的下载来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Direct {
        url: String,
    },
    Magnet {
        uri: String,
        info_hash: String,
        display_name: Option<String>, // 磁力链接 dn 参数
    },
    TorrentFile {
        path: String,
    },
    Social {
        url: String,
        platform: Platform,
    },
}

impl SourceSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            SourceSpec::Direct { .. } => TaskKind::Direct,
            SourceSpec::Magnet { .. } | SourceSpec::TorrentFile { .. } => TaskKind::Torrent,
            SourceSpec::Social { .. } => TaskKind::Social,
        }
    }

    /// 原始输入，快照中原样展示
    pub fn raw(&self) -> &str {
        match self {
            SourceSpec::Direct { url } => url,
            SourceSpec::Magnet { uri, .. } => uri,
            SourceSpec::TorrentFile { path } => path,
            SourceSpec::Social { url, .. } => url,
        }
    }

    /// 创建时刻推导的显示名，元数据到达后允许修正一次
    pub fn display_name(&self) -> String {
        match self {
            SourceSpec::Direct { url } => direct_display_name(url),
            SourceSpec::Magnet {
                display_name,
                info_hash,
                ..
            } => display_name
                .clone()
                .unwrap_or_else(|| format!("magnet-{}", &info_hash[..8.min(info_hash.len())])),
            SourceSpec::TorrentFile { path } => Path::new(path)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone()),
            SourceSpec::Social { platform, .. } => platform.label().to_string(),
        }
    }
}

/// 直链显示名：最后一段非空路径，退化为主机名
fn direct_display_name(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).next_back() {
                return last.to_string();
            }
        }
        if let Some(host) = parsed.host_str() {
            return host.to_string();
        }
    }
    url.to_string()
}
