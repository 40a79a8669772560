//! Filtered, sorted and paginated views over cached results.
//!
//! Views never rebuild anything: they borrow from an already-built
//! [`Forest`] (or finding list) and only select and order references.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::Serialize;

use crate::{
    error::AnalysisError,
    forest::{Forest, MergeEntry},
};

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 500;

/// Which forest entries a query keeps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EntryFilter {
    #[default]
    All,
    /// Atomic and unresolved entries.
    Leaves,
    Merges,
    Roots,
}

impl EntryFilter {
    fn keeps(self, entry: &MergeEntry) -> bool {
        match self {
            Self::All => true,
            Self::Leaves => entry.is_leaf(),
            Self::Merges => !entry.is_leaf(),
            Self::Roots => entry.is_root,
        }
    }
}

impl FromStr for EntryFilter {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "leaves" => Ok(Self::Leaves),
            "merges" => Ok(Self::Merges),
            "roots" => Ok(Self::Roots),
            other => Err(AnalysisError::InvalidInput(format!("unknown filter {other:?}"))),
        }
    }
}

impl fmt::Display for EntryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "all",
            Self::Leaves => "leaves",
            Self::Merges => "merges",
            Self::Roots => "roots",
        })
    }
}

/// Sort key of a forest query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Rank,
    ByteLength,
    /// Display text, compared as a string.
    Token,
}

impl SortKey {
    fn compare(self, a: &MergeEntry, b: &MergeEntry) -> Ordering {
        match self {
            Self::Rank => a.rank.cmp(&b.rank),
            Self::ByteLength => a.symbol.len().cmp(&b.symbol.len()),
            Self::Token => a.text().cmp(&b.text()),
        }
    }
}

impl FromStr for SortKey {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rank" => Ok(Self::Rank),
            "byte_length" => Ok(Self::ByteLength),
            "token" => Ok(Self::Token),
            other => Err(AnalysisError::InvalidInput(format!("unknown sort key {other:?}"))),
        }
    }
}

/// One page of a larger ordered list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Length of the list before paging.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Cuts the 1-based `page` out of `items`.
///
/// # Arguments
///
/// * `items` - Everything that matched, already in display order.
/// * `page` - 1-based page number; 0 is treated as 1.
/// * `page_size` - Clamped to `1..=MAX_PAGE_SIZE`.
///
/// # Returns
///
/// The requested slice plus the total count. A page past the end is empty
/// but still reports the total.
pub fn paginate<T>(items: impl IntoIterator<Item = T>, page: usize, page_size: usize) -> Page<T> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let items: Vec<T> = items.into_iter().collect();
    let total = items.len();

    let start = (page - 1).saturating_mul(page_size);
    let items = items.into_iter().skip(start).take(page_size).collect();

    Page {
        items,
        total,
        page,
        page_size,
    }
}

/// A filter / search / sort / paginate request over a forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForestQuery {
    pub filter: EntryFilter,
    /// Case-insensitive substring matched against display text or hex.
    pub search: String,
    pub sort_by: SortKey,
    pub descending: bool,
    pub page: usize,
    pub page_size: usize,
}

impl Default for ForestQuery {
    fn default() -> Self {
        Self {
            filter: EntryFilter::All,
            search: String::new(),
            sort_by: SortKey::Rank,
            descending: false,
            page: 1,
            page_size: 100,
        }
    }
}

/// A page of forest entries plus the forest's unfiltered counts.
#[derive(Debug, Clone, Serialize)]
pub struct ForestPage<'a> {
    pub entries: Vec<&'a MergeEntry>,
    /// Entries matching the filter and search, before paging.
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_leaves: usize,
    pub total_merges: usize,
    pub total_roots: usize,
}

impl ForestQuery {
    pub fn apply<'a>(&self, forest: &'a Forest) -> ForestPage<'a> {
        let needle = self.search.to_lowercase();

        let mut selected: Vec<&MergeEntry> = forest
            .entries()
            .iter()
            .filter(|e| self.filter.keeps(e))
            .filter(|e| needle.is_empty() || matches_search(e, &needle))
            .collect();

        selected.sort_by(|a, b| {
            let ord = self.sort_by.compare(a, b);
            let ord = if self.descending { ord.reverse() } else { ord };
            ord.then_with(|| a.rank.cmp(&b.rank))
        });

        let stats = forest.stats();
        let page = paginate(selected, self.page, self.page_size);

        ForestPage {
            entries: page.items,
            total: page.total,
            page: page.page,
            page_size: page.page_size,
            total_leaves: stats.total_leaves,
            total_merges: stats.total_merges,
            total_roots: stats.total_roots,
        }
    }
}

fn matches_search(entry: &MergeEntry, needle: &str) -> bool {
    entry.text().to_lowercase().contains(needle) || entry.hex().contains(needle)
}
