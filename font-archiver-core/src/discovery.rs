//! Discovery & grouping: scan source directories in priority order, drop
//! duplicate identities, classify each candidate into a group and apply the
//! exclusion and normalisation rules.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::contract::{Classifier, GroupKey, Groups, Item};
use crate::progress::{emit, PipelineEvent, ProgressCallback};

/// Multi-word marker that is moved to the end of a group key.
pub const NERD_FONT_MARKER: &str = "Nerd Font";

const STYLE_SUFFIX_PATTERN: &str = r"(?i)[-_\s]*(Bold|Italic|Light|Regular|Medium|Thin|Black|Oblique|Condensed|Extended|Narrow|Wide|Semi|Extra|Ultra|Demi|Heavy)$";

fn style_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STYLE_SUFFIX_PATTERN).expect("style suffix pattern is valid"))
}

/// Case-insensitive substring matcher over group keys.
#[derive(Debug, Clone, Default)]
pub struct ExclusionMatcher {
    needles: Vec<String>,
}

impl ExclusionMatcher {
    pub fn new<I, S>(exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let needles = exclusions
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { needles }
    }

    /// Returns the exclusion entry that matches `key`, if any.
    pub fn matching(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.needles
            .iter()
            .find(|needle| key.contains(needle.as_str()))
            .map(String::as_str)
    }

    pub fn matches(&self, key: &str) -> bool {
        self.matching(key).is_some()
    }
}

/// An item dropped because its group key matched an exclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedItem {
    pub item: Item,
    pub group_key: GroupKey,
    pub matched: String,
}

/// Everything a discovery pass decided, including what it dropped and why.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub groups: Groups,
    pub excluded: Vec<ExcludedItem>,
    /// Items skipped because an earlier source already provided the same identity.
    pub duplicates: Vec<Item>,
    /// Groups removed by `max_groups`.
    pub limited: Vec<GroupKey>,
}

impl DiscoveryReport {
    pub fn item_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// Move a reserved marker that is not at the end of `key` to the end:
/// `"SomeFont Nerd Font Mono"` becomes `"SomeFont Nerd Font"`. Idempotent.
pub fn normalize_group_key(key: &str) -> GroupKey {
    let trimmed = key.trim();
    let marker_len = NERD_FONT_MARKER.len();

    let ends_with_marker = trimmed.len() >= marker_len
        && trimmed
            .get(trimmed.len() - marker_len..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(NERD_FONT_MARKER));
    if ends_with_marker {
        return trimmed.to_string();
    }

    let position = trimmed.char_indices().map(|(i, _)| i).find(|&i| {
        trimmed
            .get(i..i + marker_len)
            .is_some_and(|window| window.eq_ignore_ascii_case(NERD_FONT_MARKER))
    });

    match position {
        Some(idx) => {
            let base = trimmed[..idx].trim();
            if base.is_empty() {
                NERD_FONT_MARKER.to_string()
            } else {
                format!("{base} {NERD_FONT_MARKER}")
            }
        }
        None => trimmed.to_string(),
    }
}

/// Derive a group key from a file name by stripping trailing style tokens.
pub fn key_from_file_name(path: &Path) -> GroupKey {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut key = stem.clone();
    loop {
        let stripped = style_suffix().replace(&key, "").into_owned();
        if stripped == key {
            break;
        }
        key = stripped;
    }

    let key = key.trim().to_string();
    if key.is_empty() {
        stem
    } else {
        key
    }
}

fn has_candidate_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Candidate files directly inside `root`, sorted by file name.
fn list_candidates(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = ?e, root = %root.display(), "Failed to read source directory, skipping");
            return Vec::new();
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(error = ?e, root = %root.display(), "Failed to read directory entry");
                None
            }
        })
        .filter(|path| path.is_file() && has_candidate_extension(path, extensions))
        .collect();
    candidates.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    candidates
}

/// Scan `config.sources` in priority order and group the candidates.
pub fn discover(
    config: &DiscoveryConfig,
    classifier: &dyn Classifier,
    on_progress: Option<&ProgressCallback>,
) -> DiscoveryReport {
    let exclusions = ExclusionMatcher::new(&config.exclusions);
    let mut report = DiscoveryReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for root in &config.sources {
        if !root.is_dir() {
            info!(root = %root.display(), "Source directory does not exist, skipping");
            continue;
        }
        info!(root = %root.display(), "Scanning source directory");
        emit(
            on_progress,
            PipelineEvent::ScanningSource { root: root.clone() },
        );

        for path in list_candidates(root, &config.extensions) {
            let item = Item::new(path);
            if !seen.insert(item.identity_key.clone()) {
                debug!(path = %item.source_path.display(), "Identity already provided by an earlier source");
                report.duplicates.push(item);
                continue;
            }

            let key = match classifier
                .classify(&item.source_path)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
            {
                Some(key) => key,
                None => {
                    let key = key_from_file_name(&item.source_path);
                    debug!(path = %item.source_path.display(), key = %key, "Not classifiable, using file name");
                    key
                }
            };

            if let Some(matched) = exclusions.matching(&key) {
                debug!(key = %key, matched, "Group excluded");
                report.excluded.push(ExcludedItem {
                    item,
                    group_key: key,
                    matched: matched.to_string(),
                });
                continue;
            }

            let key = normalize_group_key(&key);
            report.groups.entry(key).or_default().push(item);
        }
    }

    report.groups.retain(|_, items| !items.is_empty());

    if let Some(limit) = config.max_groups {
        if report.groups.len() > limit {
            info!(
                limit,
                total = report.groups.len(),
                "Limiting number of groups"
            );
            let dropped: Vec<GroupKey> = report.groups.keys().skip(limit).cloned().collect();
            for key in &dropped {
                report.groups.remove(key);
            }
            report.limited = dropped;
        }
    }

    info!(
        groups = report.groups.len(),
        items = report.item_count(),
        excluded = report.excluded.len(),
        duplicates = report.duplicates.len(),
        "Discovery complete"
    );
    emit(
        on_progress,
        PipelineEvent::GroupsDiscovered {
            groups: report.groups.len(),
            items: report.item_count(),
        },
    );
    report
}
