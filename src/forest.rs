//! Merge forest builder.
//!
//! Decomposes every vocabulary entry into its optimal left/right split
//! (see [`crate::split`]) and marks which entries are roots, i.e. never used
//! as a child by any other entry. Building is a parallel pass over the rank
//! table in rank order, so the result is identical for any thread count.

use std::collections::{HashMap, HashSet};

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use rayon::prelude::*;
use serde::{ser::SerializeStruct, Serialize, Serializer};

use crate::{
    error::{AnalysisError, Lookup},
    progress::progress_bar,
    split::resolve_split,
    types::{display, to_hex, Rank, RankTable, Symbol},
};

/// How a forest entry decomposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A single-byte symbol: part of the base alphabet.
    Atomic,
    /// A multi-byte symbol with no valid split in the rank table.
    Unresolved,
    /// The reconstructed final merge `left + right`.
    Merge {
        left: Symbol,
        right: Symbol,
        left_rank: Rank,
        right_rank: Rank,
    },
}

/// One decomposition record of the forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeEntry {
    pub symbol: Symbol,
    pub rank: Rank,
    pub kind: EntryKind,
    /// True if no other entry uses this symbol as a child.
    pub is_root: bool,
}

impl MergeEntry {
    /// True for atomic symbols and for multi-byte symbols that could not be traced.
    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, EntryKind::Merge { .. })
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self.kind, EntryKind::Atomic)
    }

    pub fn children(&self) -> Option<(&[u8], &[u8])> {
        match &self.kind {
            EntryKind::Merge { left, right, .. } => Some((left.as_slice(), right.as_slice())),
            _ => None,
        }
    }

    pub fn text(&self) -> String {
        display(&self.symbol)
    }

    pub fn hex(&self) -> String {
        to_hex(&self.symbol)
    }
}

impl Serialize for MergeEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (left, right, left_rank, right_rank) = match &self.kind {
            EntryKind::Merge {
                left,
                right,
                left_rank,
                right_rank,
            } => (
                Some(left.as_slice()),
                Some(right.as_slice()),
                Some(*left_rank),
                Some(*right_rank),
            ),
            _ => (None, None, None, None),
        };

        let mut s = serializer.serialize_struct("MergeEntry", 13)?;
        s.serialize_field("token", &self.text())?;
        s.serialize_field("token_hex", &self.hex())?;
        s.serialize_field("rank", &self.rank)?;
        s.serialize_field("byte_length", &self.symbol.len())?;
        s.serialize_field("is_leaf", &self.is_leaf())?;
        s.serialize_field("is_atomic", &self.is_atomic())?;
        s.serialize_field("is_root", &self.is_root)?;
        s.serialize_field("left", &left.map(display))?;
        s.serialize_field("left_hex", &left.map(to_hex))?;
        s.serialize_field("left_rank", &left_rank)?;
        s.serialize_field("right", &right.map(display))?;
        s.serialize_field("right_hex", &right.map(to_hex))?;
        s.serialize_field("right_rank", &right_rank)?;
        s.end()
    }
}

/// Entry counts over a whole forest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForestStats {
    pub total_leaves: usize,
    pub total_merges: usize,
    pub total_roots: usize,
}

/// The decomposition of a whole vocabulary, ordered by ascending rank.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    entries: Vec<MergeEntry>,
    index: HashMap<Symbol, usize>,
}

impl Forest {
    pub fn entries(&self) -> &[MergeEntry] {
        &self.entries
    }

    pub fn get(&self, symbol: &[u8]) -> Option<&MergeEntry> {
        self.index.get(symbol).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ForestStats {
        self.entries.iter().fold(ForestStats::default(), |mut acc, e| {
            if e.is_leaf() {
                acc.total_leaves += 1;
            } else {
                acc.total_merges += 1;
            }
            if e.is_root {
                acc.total_roots += 1;
            }
            acc
        })
    }
}

/// Builds the merge forest of `ranks`.
pub fn build_forest(ranks: &RankTable) -> Forest {
    build_with(ranks, ProgressBar::hidden())
}

/// Builds the merge forest of `ranks`, optionally drawing a progress bar.
///
/// # Arguments
///
/// * `ranks` - The tokenizer's full rank table.
/// * `show_progress` - Draw a bar on stderr while entries are resolved.
///
/// # Returns
///
/// One [`MergeEntry`] per symbol, in ascending rank order, with root flags
/// already set.
///
/// # Errors
///
/// Returns [`AnalysisError::ProgressBarSetup`] if the progress bar template
/// fails to compile.
pub fn build_forest_with_progress(
    ranks: &RankTable,
    show_progress: bool,
) -> Result<Forest, AnalysisError> {
    let pb = progress_bar(ranks.len(), "Building merge forest", show_progress)?;
    Ok(build_with(ranks, pb))
}

fn build_with(ranks: &RankTable, pb: ProgressBar) -> Forest {
    let ordered = ranks.sorted_entries();

    // collect() on an indexed parallel iterator preserves rank order
    let mut entries: Vec<MergeEntry> = ordered
        .par_iter()
        .progress_with(pb)
        .map(|&(symbol, rank)| decompose(symbol, rank, ranks))
        .collect();

    let roots: Vec<bool> = {
        let children: HashSet<&[u8]> = entries
            .iter()
            .filter_map(MergeEntry::children)
            .flat_map(|(l, r)| [l, r])
            .collect();
        entries
            .iter()
            .map(|e| !children.contains(e.symbol.as_slice()))
            .collect()
    };
    for (entry, is_root) in entries.iter_mut().zip(roots) {
        entry.is_root = is_root;
    }

    let index = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.symbol.clone(), i))
        .collect();

    let forest = Forest { entries, index };
    let stats = forest.stats();
    info!(
        "merge forest built: {} entries, {} merges, {} leaves, {} roots",
        forest.len(),
        stats.total_merges,
        stats.total_leaves,
        stats.total_roots
    );
    forest
}

fn decompose(symbol: &[u8], rank: Rank, ranks: &RankTable) -> MergeEntry {
    let kind = if symbol.len() <= 1 {
        EntryKind::Atomic
    } else {
        match resolve_split(symbol, ranks) {
            Some((left, right)) => match (ranks.get(left), ranks.get(right)) {
                (Some(left_rank), Some(right_rank)) => EntryKind::Merge {
                    left: left.to_vec(),
                    right: right.to_vec(),
                    left_rank,
                    right_rank,
                },
                _ => EntryKind::Unresolved,
            },
            None => EntryKind::Unresolved,
        }
    };

    MergeEntry {
        symbol: symbol.to_vec(),
        rank,
        kind,
        is_root: true,
    }
}

/// One node of a [`Subtree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeNode {
    pub symbol: Symbol,
    /// `None` when the symbol is not in the rank table.
    pub rank: Option<Rank>,
    /// Arena indices of the left and right children.
    pub children: Option<(usize, usize)>,
}

impl SubtreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }
}

/// Full recursive decomposition of one symbol, stored as an arena.
///
/// The root is node 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtree {
    nodes: Vec<SubtreeNode>,
}

impl Subtree {
    pub fn root(&self) -> &SubtreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, idx: usize) -> Option<&SubtreeNode> {
        self.nodes.get(idx)
    }

    pub fn nodes(&self) -> &[SubtreeNode] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(0usize, 1usize)];
        while let Some((idx, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let Some((l, r)) = self.nodes[idx].children {
                stack.push((l, depth + 1));
                stack.push((r, depth + 1));
            }
        }
        deepest
    }
}

/// Decomposes `symbol` recursively down to atomic or unresolvable pieces.
///
/// Traversal uses an explicit work stack. A child is only expanded when it is
/// strictly shorter than its parent, which bounds the tree by the symbol length
/// even for a corrupted rank table.
///
/// # Arguments
///
/// * `ranks` - Rank table used to resolve each split.
/// * `symbol` - The symbol to decompose. It need not be in `ranks`.
///
/// # Returns
///
/// An arena rooted at node 0 whose leaves are single bytes or symbols
/// without a valid split.
pub fn subtree(ranks: &RankTable, symbol: &[u8]) -> Subtree {
    let mut nodes = vec![SubtreeNode {
        symbol: symbol.to_vec(),
        rank: ranks.get(symbol),
        children: None,
    }];
    let mut stack = vec![0usize];

    while let Some(idx) = stack.pop() {
        let parent = nodes[idx].symbol.clone();
        if parent.len() <= 1 {
            continue;
        }
        let Some((left, right)) = resolve_split(&parent, ranks) else {
            continue;
        };
        if left.len() >= parent.len() || right.len() >= parent.len() {
            warn!(
                "subtree: split of {:?} does not shrink; stopping descent",
                display(&parent)
            );
            continue;
        }

        let left_idx = nodes.len();
        nodes.push(SubtreeNode {
            symbol: left.to_vec(),
            rank: ranks.get(left),
            children: None,
        });
        let right_idx = nodes.len();
        nodes.push(SubtreeNode {
            symbol: right.to_vec(),
            rank: ranks.get(right),
            children: None,
        });

        nodes[idx].children = Some((left_idx, right_idx));
        stack.push(right_idx);
        stack.push(left_idx);
    }

    Subtree { nodes }
}

/// Decomposes the symbol holding `rank`.
///
/// # Errors
///
/// Returns [`AnalysisError::NotFound`] if no symbol holds `rank`.
pub fn subtree_by_rank(ranks: &RankTable, rank: Rank) -> Result<Subtree, AnalysisError> {
    let symbol = ranks
        .symbol_for_rank(rank)
        .ok_or(AnalysisError::NotFound(Lookup::Rank(rank)))?;
    Ok(subtree(ranks, symbol))
}

/// Nested view of one subtree node, for serialization.
struct NodeView<'a> {
    tree: &'a Subtree,
    idx: usize,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = &self.tree.nodes[self.idx];
        let child = |i: usize| NodeView {
            tree: self.tree,
            idx: i,
        };

        let mut s = serializer.serialize_struct("SubtreeNode", 6)?;
        s.serialize_field("token", &display(&node.symbol))?;
        s.serialize_field("token_hex", &to_hex(&node.symbol))?;
        s.serialize_field("rank", &node.rank)?;
        s.serialize_field("is_leaf", &node.is_leaf())?;
        s.serialize_field("left", &node.children.map(|(l, _)| child(l)))?;
        s.serialize_field("right", &node.children.map(|(_, r)| child(r)))?;
        s.end()
    }
}

impl Serialize for Subtree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Subtree", 3)?;
        s.serialize_field("root", &NodeView { tree: self, idx: 0 })?;
        s.serialize_field("depth", &self.depth())?;
        s.serialize_field("node_count", &self.node_count())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, Rank)]) -> RankTable {
        entries
            .iter()
            .map(|(s, r)| (s.as_bytes().to_vec(), *r))
            .collect()
    }

    fn hello_table() -> RankTable {
        table(&[
            ("h", 0),
            ("e", 1),
            ("l", 2),
            ("o", 3),
            ("he", 4),
            ("ll", 5),
            ("llo", 6),
            ("hello", 7),
            ("zq", 8),
        ])
    }

    #[test]
    fn test_forest_classifies_entries() {
        let forest = build_forest(&hello_table());
        assert_eq!(forest.len(), 9);

        let h = forest.get(b"h").expect("h should be present");
        assert!(h.is_atomic() && h.is_leaf());

        let zq = forest.get(b"zq").expect("zq should be present");
        assert_eq!(zq.kind, EntryKind::Unresolved);
        assert!(zq.is_leaf() && !zq.is_atomic());

        let hello = forest.get(b"hello").expect("hello should be present");
        assert_eq!(
            hello.kind,
            EntryKind::Merge {
                left: b"he".to_vec(),
                right: b"llo".to_vec(),
                left_rank: 4,
                right_rank: 6,
            }
        );
    }

    #[test]
    fn test_forest_roots() {
        let forest = build_forest(&hello_table());
        let roots: Vec<String> = forest
            .entries()
            .iter()
            .filter(|e| e.is_root)
            .map(MergeEntry::text)
            .collect();
        assert!(roots.contains(&"hello".to_string()));
        assert!(roots.contains(&"zq".to_string()));
        assert!(!roots.contains(&"he".to_string()));
        assert!(!roots.contains(&"ll".to_string()));
        assert!(!roots.contains(&"o".to_string()));
    }

    #[test]
    fn test_forest_is_rank_ordered() {
        let forest = build_forest(&hello_table());
        let ranks: Vec<Rank> = forest.entries().iter().map(|e| e.rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn test_forest_stats() {
        let stats = build_forest(&hello_table()).stats();
        // atomic h,e,l,o + unresolved zq
        assert_eq!(stats.total_leaves, 5);
        assert_eq!(stats.total_merges, 4);
        // hello, zq
        assert_eq!(stats.total_roots, 2);
    }

    #[test]
    fn test_forest_with_hidden_progress() {
        let forest = build_forest_with_progress(&hello_table(), false)
            .expect("hidden progress bar should build");
        assert_eq!(forest.len(), 9);
    }

    #[test]
    fn test_subtree_full_decomposition() {
        let tree = subtree(&hello_table(), b"hello");
        assert_eq!(tree.root().rank, Some(7));
        // hello -> he, llo ; he -> h, e ; llo -> ll, o ; ll -> l, l
        assert_eq!(tree.node_count(), 9);
        assert_eq!(tree.depth(), 4);
    }

    #[test]
    fn test_subtree_of_unknown_symbol() {
        let tree = subtree(&hello_table(), b"hex");
        assert_eq!(tree.root().rank, None);
        // "he" + "x" is not valid ("x" missing), "h"+"ex" neither
        assert!(tree.root().is_leaf());
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_subtree_by_rank() {
        let ranks = hello_table();
        let tree = subtree_by_rank(&ranks, 5).expect("rank 5 exists");
        assert_eq!(tree.root().symbol, b"ll".to_vec());
        assert!(matches!(
            subtree_by_rank(&ranks, 99),
            Err(AnalysisError::NotFound(Lookup::Rank(99)))
        ));
    }

    #[test]
    fn test_subtree_serializes_nested() {
        let tree = subtree(&table(&[("a", 0), ("b", 1), ("ab", 2)]), b"ab");
        let json = serde_json::to_value(&tree).expect("subtree should serialize");
        assert_eq!(json["depth"], 2);
        assert_eq!(json["node_count"], 3);
        assert_eq!(json["root"]["token"], "ab");
        assert_eq!(json["root"]["left"]["token"], "a");
        assert_eq!(json["root"]["right"]["is_leaf"], true);
        assert!(json["root"]["left"]["left"].is_null());
    }

    #[test]
    fn test_entry_serializes_lossy() {
        // a lone UTF-8 lead byte
        let ranks: RankTable = vec![(vec![0xc3], 0)].into_iter().collect();
        let forest = build_forest(&ranks);
        let json = serde_json::to_value(&forest.entries()[0]).expect("entry should serialize");
        assert_eq!(json["token"], "\u{FFFD}");
        assert_eq!(json["token_hex"], "c3");
        assert_eq!(json["is_atomic"], true);
        assert!(json["left"].is_null());
    }
}
