use super::types::SourceId;
use serde::Serialize;
use std::path::PathBuf;

/// Whether a source's bytes are currently reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "reason")]
pub enum SourceStatus {
    /// Not mapped yet (lazy readers only)
    Pending,
    Mapped,
    Unavailable(String),
}

/// Per-source breakdown of a dedup file.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub id: SourceId,
    pub path: PathBuf,
    pub size: u64,
    /// Logical bytes served from this source
    pub referenced_bytes: u64,
    pub entry_count: usize,
    pub status: SourceStatus,
}

/// Description of an opened dedup file.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub path: Option<PathBuf>,
    pub version: u32,
    pub logical_size: u64,
    pub entry_count: usize,
    pub source_count: usize,
    pub has_fingerprints: bool,
    pub sources: Vec<SourceSummary>,
}

/// Display information about a dedup file
pub fn print_info(info: &Info) {
    println!("Dedup File");
    println!("==========");
    println!();
    if let Some(path) = &info.path {
        println!("Path:             {}", path.display());
    }
    println!("Format version:   {}", info.version);
    println!("Logical size:     {}", format_size(info.logical_size));
    println!("Entries:          {}", info.entry_count);
    println!("Sources:          {}", info.source_count);
    println!("Fingerprints:     {}", if info.has_fingerprints { "yes" } else { "no" });

    println!();
    for source in &info.sources {
        let status = match &source.status {
            SourceStatus::Pending | SourceStatus::Mapped => String::new(),
            SourceStatus::Unavailable(reason) => format!(" [unavailable: {reason}]"),
        };
        println!("  #{} {}{}", source.id, source.path.display(), status);
        println!(
            "    {} of {} referenced in {} entries",
            format_size(source.referenced_bytes),
            format_size(source.size),
            source.entry_count
        );
    }
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
