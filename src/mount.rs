//! Mount point resolution.
//!
//! Rings and descriptors are scoped to a mount, so the client needs the
//! mount point covering its target path. The table is read from
//! `/proc/self/mountinfo`:
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt/3fs rw,noatime master:1 - fuse.hf3fs hf3fs.stage rw
//! │  │  │    │     │        │          │        │ │          └ source
//! │  │  │    │     │        │          │        │ └ fs type
//! │  │  │    │     │        │          │        └ separator
//! │  │  │    │     │        │          └ optional fields
//! │  │  │    │     │        └ mount options
//! │  │  │    │     └ mount point
//! │  │  │    └ root within the filesystem
//! ```

use std::path::{Component, Path, PathBuf};

use crate::constants::MOUNTINFO_PATH;
use crate::error::{UsrbioError, UsrbioResult};

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

/// Snapshot of the process mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read the mount table of the current process
    pub fn load() -> UsrbioResult<Self> {
        let contents =
            std::fs::read_to_string(MOUNTINFO_PATH).map_err(|source| UsrbioError::Resource {
                what: format!("read {}", MOUNTINFO_PATH),
                source,
            })?;
        Ok(Self::parse(&contents))
    }

    /// Parse mountinfo text. Malformed lines are skipped.
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let entry = parse_mountinfo_line(line);
                if entry.is_none() && !line.trim().is_empty() {
                    tracing::debug!("skipping malformed mountinfo line: {}", line);
                }
                entry
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Find the mount covering `path`.
    ///
    /// The longest matching mount point wins. When `fs_types` is non-empty,
    /// only mounts of those filesystem types are considered.
    pub fn resolve(&self, path: &Path, fs_types: &[String]) -> UsrbioResult<PathBuf> {
        let target = canonical_prefix(path)?;

        self.entries
            .iter()
            .filter(|e| fs_types.is_empty() || fs_types.iter().any(|t| *t == e.fs_type))
            .filter(|e| target.starts_with(&e.mount_point))
            .max_by_key(|e| e.mount_point.components().count())
            .map(|e| e.mount_point.clone())
            .ok_or_else(|| UsrbioError::MountNotFound(path.to_path_buf()))
    }
}

fn parse_mountinfo_line(line: &str) -> Option<MountEntry> {
    let (pre, post) = line.split_once(" - ")?;

    let mount_point = pre.split_whitespace().nth(4)?;
    let mut post_fields = post.split_whitespace();
    let fs_type = post_fields.next()?;
    let source = post_fields.next().unwrap_or("none");

    Some(MountEntry {
        mount_point: PathBuf::from(unescape_octal(mount_point)),
        fs_type: fs_type.to_string(),
        source: unescape_octal(source),
    })
}

/// Decode the `\ooo` escapes the kernel uses for spaces, tabs, newlines
/// and backslashes.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Absolute, canonical form of the longest existing ancestor of `path`.
///
/// The file itself may not exist yet, and nonexistent components cannot
/// cross a mount boundary.
fn canonical_prefix(path: &Path) -> UsrbioResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|source| UsrbioError::Resource {
                what: "read current directory".to_string(),
                source,
            })?
            .join(path)
    };

    let absolute: PathBuf = absolute
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();

    absolute
        .ancestors()
        .find_map(|ancestor| ancestor.canonicalize().ok())
        .ok_or_else(|| UsrbioError::MountNotFound(path.to_path_buf()))
}
