use std::time::Duration;
use crate::upload::record::UploadRecord;

/// 格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 格式化持续时间
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// One status line, e.g. `video.mp4  uploading  10.00 MB / 12.00 MB (83%)`.
pub fn format_record(record: &UploadRecord) -> String {
    let mut line = format!(
        "{}  {}  {}  {} / {} ({:.0}%)",
        record.id,
        record.file.name,
        record.status,
        format_bytes(record.uploaded_bytes),
        format_bytes(record.file.size_bytes),
        record.progress_percent(),
    );

    if let (Some(started), Some(completed)) = (record.started_at, record.completed_at) {
        if let Ok(elapsed) = (completed - started).to_std() {
            line.push_str(&format!(" in {}", format_duration(elapsed)));
        }
    }

    if let Some(error) = &record.last_error {
        line.push_str(&format!("  error: {}", error));
    }

    line
}
