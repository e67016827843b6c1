//! Archive expansion
//!
//! Uploads frequently arrive as a zip holding the model next to its
//! textures. The expander replaces every archive entry of a bundle with the
//! files it contains so the later stages only ever see a flat bundle.
//! Expansion is one level deep: an archive found inside an archive is kept
//! as an ordinary entry.

use crate::bundle::{AssetBundle, extension_of, normalize_path};
use crate::error::{Warning, report};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::debug;
use zip::ZipArchive;

/// Default cap on the number of files taken from one archive
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default cap on decompressed bytes taken from one archive (512 MiB)
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 512 * 1024 * 1024;

/// Which entries are archives and how much of each may be decompressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Extensions treated as archives (lowercase, no dot)
    ///
    /// Every archive is read as a zip container; other extensions only make
    /// sense for zip files saved under another name.
    pub extensions: Vec<String>,
    /// Maximum number of files taken from one archive
    pub max_entries: usize,
    /// Maximum decompressed bytes taken from one archive
    pub max_total_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["zip".to_string()],
            max_entries: DEFAULT_MAX_ENTRIES,
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
        }
    }
}

impl ArchiveConfig {
    /// Whether a bundle path names an archive
    pub fn is_archive(&self, path: &str) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.iter().any(|a| *a == ext))
    }
}

/// Result of expanding a bundle
#[derive(Debug, Clone)]
pub struct Expanded {
    /// The flattened bundle
    pub bundle: AssetBundle,
    /// Archives that were skipped and entries that were dropped
    pub warnings: Vec<Warning>,
}

/// Expand zip entries with the default configuration
///
/// # Example
///
/// ```
/// use print_ingest::{AssetBundle, expand};
///
/// let bundle = AssetBundle::from_entries([("part.stl", vec![0u8; 84])]);
/// let expanded = expand(&bundle);
///
/// assert_eq!(expanded.bundle, bundle);
/// assert!(expanded.warnings.is_empty());
/// ```
pub fn expand(bundle: &AssetBundle) -> Expanded {
    expand_with_config(bundle, &ArchiveConfig::default())
}

/// Expand archive entries of a bundle
///
/// Non-archive entries pass through unchanged and win over archive contents
/// with the same path. A corrupt archive, or one exceeding the configured
/// limits, contributes nothing and is reported as
/// [`Warning::ArchiveSkipped`]; expansion itself never fails.
pub fn expand_with_config(bundle: &AssetBundle, config: &ArchiveConfig) -> Expanded {
    let mut warnings = Vec::new();
    let mut entries: BTreeMap<String, Arc<[u8]>> = BTreeMap::new();
    let mut archives = Vec::new();

    for (path, bytes) in bundle.iter() {
        if config.is_archive(path) {
            archives.push((path, bytes));
        } else {
            entries.insert(path.to_string(), Arc::clone(bytes));
        }
    }

    if archives.is_empty() {
        return Expanded {
            bundle: bundle.clone(),
            warnings,
        };
    }

    for (archive_path, bytes) in archives {
        let files = match read_archive(archive_path, bytes, config, &mut warnings) {
            Ok(files) => files,
            Err(reason) => {
                report(
                    &mut warnings,
                    Warning::ArchiveSkipped {
                        path: archive_path.to_string(),
                        reason,
                    },
                );
                continue;
            }
        };

        debug!(
            archive = archive_path,
            files = files.len(),
            "Expanded archive"
        );

        for (path, data) in files {
            if entries.contains_key(&path) {
                report(&mut warnings, Warning::DuplicateEntry { path });
                continue;
            }
            if config.is_archive(&path) {
                report(
                    &mut warnings,
                    Warning::NestedArchiveNotExpanded { path: path.clone() },
                );
            }
            entries.insert(path, data);
        }
    }

    Expanded {
        bundle: AssetBundle::from_map(entries),
        warnings,
    }
}

/// Read every file of one archive, or nothing at all
///
/// Unsafe entry names are reported and skipped without failing the archive.
fn read_archive(
    archive_path: &str,
    bytes: &[u8],
    config: &ArchiveConfig,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<(String, Arc<[u8]>)>, String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("not a readable zip container: {}", e))?;
    let mut files = Vec::new();
    let mut total: u64 = 0;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| e.to_string())?;
        if file.is_dir() {
            continue;
        }

        let raw_name = file.name().to_string();
        // Backslash separators are only normalized after `enclosed_name`, so
        // `..` is checked again on the final key
        let name = file
            .enclosed_name()
            .map(|enclosed| normalize_path(&enclosed.to_string_lossy()))
            .filter(|name| !name.split('/').any(|segment| segment == ".."));
        let Some(name) = name else {
            report(
                warnings,
                Warning::UnsafeArchivePath {
                    archive: archive_path.to_string(),
                    entry: raw_name,
                },
            );
            continue;
        };
        if name.is_empty() || is_resource_fork(&name) {
            debug!(entry = raw_name.as_str(), "Skipping archive metadata entry");
            continue;
        }

        if files.len() >= config.max_entries {
            return Err(format!(
                "more than {} files (limit reached)",
                config.max_entries
            ));
        }

        let remaining = config.max_total_bytes.saturating_sub(total);
        let mut data = Vec::new();
        // Read one byte past the budget to detect overflow without trusting headers
        (&mut file)
            .take(remaining.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| format!("failed to read '{}': {}", raw_name, e))?;
        total += data.len() as u64;
        if total > config.max_total_bytes {
            return Err(format!(
                "decompressed size exceeds {} bytes",
                config.max_total_bytes
            ));
        }

        files.push((name, Arc::from(data)));
    }

    Ok(files)
}

/// macOS archive utilities add `__MACOSX/` trees and `._name` AppleDouble files
fn is_resource_fork(path: &str) -> bool {
    path.starts_with("__MACOSX/")
        || crate::bundle::file_name(path).starts_with("._")
}
