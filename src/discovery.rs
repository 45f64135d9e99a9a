//! Test file discovery.
//!
//! Runners find the files they are responsible for by walking the working
//! directory and matching relative paths against an include glob, pruning
//! anything the exclude glob matches. Alternatively the list of files can be
//! supplied up front in a plain text file, one path per line.
//!
//! ```text
//!  ./ ──walk──► spec/models/user_spec.rb ──include?──► yes ──► collected
//!   │
//!   └──► node_modules/ ──exclude?──► yes ──► whole directory skipped
//! ```
//!
//! Globs follow the usual shell conventions: `*` stays within one path
//! component, `**` crosses directories, and `{a,b}` alternates.

use std::path::Path;

use globset::{Glob, GlobBuilder, GlobMatcher};
use tracing::warn;
use walkdir::WalkDir;

/// Result type for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// How many leading bytes of a files list are inspected to decide whether
/// it is text.
const SNIFF_LEN: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("error parsing test file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("error parsing test file exclude pattern {pattern:?}: {source}")]
    InvalidExcludePattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Listing packages through the toolchain failed.
    #[error("{0}")]
    PackageListing(String),

    #[error("couldn't read files from `{path}`")]
    FilesListUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{path}` is not a text file")]
    FilesListNotText { path: String },

    #[error("no test files found in `{path}`")]
    FilesListEmpty { path: String },
}

/// Walks `root` and returns the relative paths of files matching `include`
/// and not matching `exclude`.
///
/// An excluded directory is not descended into. An empty `exclude` excludes
/// nothing. The result is sorted; an empty result is not an error here.
pub fn discover_test_files(
    root: &Path,
    include: &str,
    exclude: &str,
) -> DiscoveryResult<Vec<String>> {
    let include_matcher =
        compile(include).map_err(|source| DiscoveryError::InvalidPattern {
            pattern: include.to_string(),
            source,
        })?;

    let exclude_matcher = if exclude.is_empty() {
        None
    } else {
        Some(
            compile(exclude).map_err(|source| DiscoveryError::InvalidExcludePattern {
                pattern: exclude.to_string(),
                source,
            })?,
        )
    };

    let mut files = Vec::new();
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Error walking: {}", e);
                continue;
            }
        };

        let Some(relative) = relative_path(root, entry.path()) else {
            continue;
        };
        let is_dir = entry.file_type().is_dir();

        if exclude_matcher
            .as_ref()
            .is_some_and(|m| m.is_match(&relative))
        {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        if !is_dir && include_matcher.is_match(&relative) {
            files.push(relative);
        }
    }

    Ok(files)
}

/// Reads a list of test files, one per line. Blank lines are skipped and
/// surrounding whitespace is trimmed.
pub fn read_files_list(path: &str) -> DiscoveryResult<Vec<String>> {
    let content =
        std::fs::read(path).map_err(|source| DiscoveryError::FilesListUnreadable {
            path: path.to_string(),
            source,
        })?;

    if !looks_like_text(&content) {
        return Err(DiscoveryError::FilesListNotText {
            path: path.to_string(),
        });
    }

    let files: Vec<String> = String::from_utf8_lossy(&content)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    if files.is_empty() {
        return Err(DiscoveryError::FilesListEmpty {
            path: path.to_string(),
        });
    }

    Ok(files)
}

fn compile(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    let glob: Glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()?;
    Ok(glob.compile_matcher())
}

/// Path of `path` relative to `root`, using `/` separators.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Text heuristic: no binary control bytes and valid UTF-8 within the
/// sniffed prefix. A multi-byte character cut off by the prefix boundary is
/// tolerated.
fn looks_like_text(content: &[u8]) -> bool {
    let head = &content[..content.len().min(SNIFF_LEN)];
    if head.iter().copied().any(is_binary_byte) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && head.len() == SNIFF_LEN,
    }
}

/// Control characters that never appear in text. Tab, newline, form feed,
/// carriage return and escape are allowed.
fn is_binary_byte(byte: u8) -> bool {
    matches!(byte, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
