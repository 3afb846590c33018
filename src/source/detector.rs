use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use super::errors::SourceError;
use super::models::{Platform, SourceInput, SourceSpec};
use crate::registry::task::TaskKind;

lazy_static! {
    // btih 信息哈希：40位十六进制 或 32位 base32
    static ref MAGNET_PATTERN: Regex =
        Regex::new(r"^magnet:\?.*xt=urn:btih:([0-9A-Fa-f]{40}|[A-Za-z2-7]{32})").unwrap();
}

// 按域名后缀识别的社媒平台
const PLATFORM_HOSTS: &[(&str, Platform)] = &[
    ("youtube.com", Platform::Youtube),
    ("youtu.be", Platform::Youtube),
    ("twitter.com", Platform::Twitter),
    ("x.com", Platform::Twitter),
    ("instagram.com", Platform::Instagram),
    ("tiktok.com", Platform::Tiktok),
    ("bilibili.com", Platform::Bilibili),
    ("b23.tv", Platform::Bilibili),
];

/// 按来源类型校验原始输入，通过后得到类型化的来源
pub fn parse_source(kind: TaskKind, input: &SourceInput) -> Result<SourceSpec, SourceError> {
    match kind {
        TaskKind::Direct => parse_direct(required_url(input)?),
        TaskKind::Torrent => parse_torrent(input),
        TaskKind::Social => parse_social(required_url(input)?),
    }
}

fn required_url(input: &SourceInput) -> Result<&str, SourceError> {
    match input.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(SourceError::Empty),
    }
}

fn parse_direct(url: &str) -> Result<SourceSpec, SourceError> {
    let parsed = Url::parse(url).map_err(|_| SourceError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(SourceSpec::Direct {
            url: parsed.into(),
        }),
        _ => Err(SourceError::InvalidUrl(url.to_string())),
    }
}

/// 种子任务：磁力链接与上传的 .torrent 描述文件互斥，必须且只能给一个
fn parse_torrent(input: &SourceInput) -> Result<SourceSpec, SourceError> {
    let url = input
        .url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let torrent_file = input
        .torrent_file
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    match (url, torrent_file) {
        (Some(_), Some(_)) => Err(SourceError::AmbiguousTorrentInput),
        (None, None) => Err(SourceError::MissingTorrentInput),
        (Some(uri), None) => parse_magnet(uri),
        (None, Some(path)) => {
            if Path::new(path).extension().is_some_and(|ext| ext == "torrent") {
                Ok(SourceSpec::TorrentFile {
                    path: path.to_string(),
                })
            } else {
                Err(SourceError::InvalidTorrentFile(path.to_string()))
            }
        }
    }
}

fn parse_magnet(uri: &str) -> Result<SourceSpec, SourceError> {
    let captures = MAGNET_PATTERN
        .captures(uri)
        .ok_or_else(|| SourceError::InvalidMagnet(uri.to_string()))?;
    let info_hash = captures[1].to_string();

    // dn 参数作为初始显示名
    let display_name = Url::parse(uri).ok().and_then(|parsed| {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "dn")
            .map(|(_, value)| value.into_owned())
    });

    Ok(SourceSpec::Magnet {
        uri: uri.to_string(),
        info_hash,
        display_name,
    })
}

fn parse_social(url: &str) -> Result<SourceSpec, SourceError> {
    let parsed = Url::parse(url).map_err(|_| SourceError::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SourceError::InvalidUrl(url.to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| SourceError::InvalidUrl(url.to_string()))?;

    let platform = PLATFORM_HOSTS
        .iter()
        .find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{suffix}")))
        .map(|(_, platform)| *platform)
        .ok_or_else(|| SourceError::UnsupportedPlatform(host.to_string()))?;

    Ok(SourceSpec::Social {
        url: parsed.into(),
        platform,
    })
}
