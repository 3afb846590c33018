// 界面展示用的字节量 / 速率格式化

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// 人类可读的字节量，如 "4.2 GB"
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// 人类可读的速率，如 "3.2 MB/s"
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// 百分比进度，如 "75%"
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.0}%", ratio.clamp(0.0, 1.0) * 100.0)
}
