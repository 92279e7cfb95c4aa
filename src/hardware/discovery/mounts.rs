//! Mount table reader.

use crate::domain::ports::SourceCollector;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
}

/// Snapshot of the live mounts
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    /// Parse `/proc/self/mounts` formatted text
    pub fn parse(text: &str) -> Vec<MountEntry> {
        text.lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fstype = fields.next().unwrap_or_default();
                Some(MountEntry {
                    source: unescape(source),
                    target: unescape(target),
                    fstype: fstype.to_string(),
                })
            })
            .collect()
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Whether the device, or one of its partitions, is a mount source
    pub fn contains_device(&self, device_path: &str) -> bool {
        if device_path.is_empty() {
            return false;
        }
        self.entries
            .iter()
            .any(|e| is_device_or_partition(&e.source, device_path))
    }
}

/// `source` is `device` or one of its partitions. Partition names take a
/// `p` before the number when the disk name itself ends in a digit.
fn is_device_or_partition(source: &str, device: &str) -> bool {
    let Some(suffix) = source.strip_prefix(device) else {
        return false;
    };
    if suffix.is_empty() {
        return true;
    }
    let digits = if device.ends_with(|c: char| c.is_ascii_digit()) {
        match suffix.strip_prefix('p') {
            Some(d) => d,
            None => return false,
        }
    } else {
        suffix
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Decode the octal escapes the kernel uses for whitespace in paths
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|octal| u8::from_str_radix(octal, 8).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Reads the mount table from procfs
pub struct MountTableReader {
    path: PathBuf,
}

impl MountTableReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl SourceCollector for MountTableReader {
    type Record = MountEntry;

    fn name(&self) -> &'static str {
        "mounts"
    }

    async fn collect(&self) -> Result<Vec<MountEntry>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Ok(MountTable::parse(&text))
    }
}
