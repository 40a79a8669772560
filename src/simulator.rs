//! Merge tree simulator.
//!
//! Replays greedy BPE over the raw bytes of a text: at every round the
//! adjacent pair with the lowest rank is merged (leftmost on ties) until no
//! adjacent pair has a rank. Each merge becomes an internal node of a binary
//! tree, and each round is logged as a [`MergeStep`].
//!
//! Instead of rescanning all pairs every round, candidate pairs live in a
//! min-heap keyed by `(rank, position)`. Entries go stale when one of their
//! nodes is consumed and are discarded lazily when popped. Because positions
//! are the byte offsets of each node's first byte, they order pairs exactly as
//! their left-to-right index in the current sequence would.
//!
//! The engine is generic over [`PairRanker`], so the same loop drives both
//! rank-table simulation and merge-rule simulation (see
//! [`crate::undertrained`]).

use std::{cmp::Ordering, collections::BinaryHeap};

use serde::{ser::SerializeStruct, Serialize, Serializer};

use crate::types::{byte_label, display, Rank, RankTable, Symbol};

/// Assigns a rank to merging two adjacent symbols, if the merge is allowed.
pub trait PairRanker {
    fn pair_rank(&self, left: &[u8], right: &[u8]) -> Option<Rank>;
}

/// A rank table ranks a pair by the rank of its concatenation.
impl PairRanker for RankTable {
    fn pair_rank(&self, left: &[u8], right: &[u8]) -> Option<Rank> {
        let mut merged = Vec::with_capacity(left.len() + right.len());
        merged.extend_from_slice(left);
        merged.extend_from_slice(right);
        self.get(&merged)
    }
}

/// Index of a node in a [`MergeTree`] arena.
pub type NodeId = usize;

/// A node of a merge tree: a single input byte or the result of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeNode {
    pub symbol: Symbol,
    /// Rank of the merge that produced this node; `None` for input bytes.
    pub rank: Option<Rank>,
    pub children: Option<(NodeId, NodeId)>,
}

impl MergeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn text(&self) -> String {
        display(&self.symbol)
    }
}

/// The merge forest of one text: an arena of nodes plus the final roots in
/// text order.
///
/// A fully reduced text has a single root; merging that halts early (e.g. on
/// vocabulary gaps) leaves several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeTree {
    nodes: Vec<MergeNode>,
    roots: Vec<NodeId>,
}

impl MergeTree {
    pub fn node(&self, id: NodeId) -> Option<&MergeNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[MergeNode] {
        &self.nodes
    }

    pub fn roots(&self) -> impl Iterator<Item = &MergeNode> {
        self.roots.iter().map(|&id| &self.nodes[id])
    }

    pub fn root_ids(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Display text of every final root, in order.
    pub fn final_tokens(&self) -> Vec<String> {
        self.roots().map(MergeNode::text).collect()
    }

    /// Symbols of every final root, in order.
    pub fn final_symbols(&self) -> Vec<Symbol> {
        self.roots().map(|n| n.symbol.clone()).collect()
    }

    /// Iterates the internal (merge-result) nodes.
    ///
    /// Every node in the arena belongs to the tree, so no traversal is needed.
    pub fn internal_nodes(&self) -> impl Iterator<Item = &MergeNode> {
        self.nodes.iter().filter(|n| !n.is_leaf())
    }
}

/// One logged merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeStep {
    /// 1-based position in the merge log.
    pub step: usize,
    pub merged_token: String,
    pub rank: Rank,
    /// The whole flattened sequence right after this merge.
    pub tokens_after: Vec<String>,
}

/// Result of simulating one text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Simulation {
    #[serde(rename = "trees")]
    pub tree: MergeTree,
    pub steps: Vec<MergeStep>,
}

/// Simulates greedy BPE over the UTF-8 bytes of `text` using `ranks`.
///
/// Leaves are single bytes, not characters: a multi-byte character starts as
/// several leaves.
///
/// # Arguments
///
/// * `text` - Input text; its UTF-8 bytes are the initial leaves.
/// * `ranks` - A pair merges when its concatenation is in the table.
///
/// # Returns
///
/// The merge tree together with one [`MergeStep`] per merge, in the order
/// the merges were applied.
pub fn simulate(text: &str, ranks: &RankTable) -> Simulation {
    MergeEngine::new(text.as_bytes(), ranks, true).run()
}

/// Reduces `bytes` with `ranker` and returns only the final pieces.
pub fn reduce<R: PairRanker + ?Sized>(bytes: &[u8], ranker: &R) -> Vec<Symbol> {
    MergeEngine::new(bytes, ranker, false).run().tree.final_symbols()
}

/// Item in the priority queue of mergeable pairs.
#[derive(Debug, PartialEq, Eq)]
struct MergeCandidate {
    rank: Rank,
    /// Byte offset of the left node's first byte.
    position: usize,
    left: NodeId,
    right: NodeId,
}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for min-heap behavior on BinaryHeap; ties go to the leftmost pair
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.position.cmp(&self.position))
    }
}

struct MergeEngine<'r, R: ?Sized> {
    ranker: &'r R,
    record_steps: bool,
    nodes: Vec<MergeNode>,
    /// `slots[pos]` is the live node starting at byte `pos`; `None` once consumed.
    slots: Vec<Option<NodeId>>,
    heap: BinaryHeap<MergeCandidate>,
    steps: Vec<MergeStep>,
}

impl<'r, R: PairRanker + ?Sized> MergeEngine<'r, R> {
    fn new(bytes: &[u8], ranker: &'r R, record_steps: bool) -> Self {
        let nodes: Vec<MergeNode> = bytes
            .iter()
            .map(|&b| MergeNode {
                symbol: vec![b],
                rank: None,
                children: None,
            })
            .collect();
        let slots = (0..nodes.len()).map(Some).collect();

        Self {
            ranker,
            record_steps,
            nodes,
            slots,
            heap: BinaryHeap::new(),
            steps: Vec::new(),
        }
    }

    fn run(mut self) -> Simulation {
        for pos in 0..self.slots.len().saturating_sub(1) {
            self.push_candidate(pos, pos + 1);
        }

        while let Some(candidate) = self.heap.pop() {
            let pos = candidate.position;

            // the left node must still be live at its slot
            if self.slots.get(pos).copied().flatten() != Some(candidate.left) {
                continue;
            }
            // and its live right neighbor must be the recorded right node
            let Some(right_pos) = self.next_live(pos) else {
                continue;
            };
            if self.slots[right_pos] != Some(candidate.right) {
                continue;
            }

            let mut symbol = self.nodes[candidate.left].symbol.clone();
            symbol.extend_from_slice(&self.nodes[candidate.right].symbol);
            let merged = self.nodes.len();
            self.nodes.push(MergeNode {
                symbol,
                rank: Some(candidate.rank),
                children: Some((candidate.left, candidate.right)),
            });
            self.slots[pos] = Some(merged);
            self.slots[right_pos] = None;

            if self.record_steps {
                self.record_step(merged, candidate.rank);
            }

            if let Some(left_pos) = self.prev_live(pos) {
                self.push_candidate(left_pos, pos);
            }
            if let Some(next_pos) = self.next_live(pos) {
                self.push_candidate(pos, next_pos);
            }
        }

        let roots = self.slots.iter().flatten().copied().collect();
        Simulation {
            tree: MergeTree {
                nodes: self.nodes,
                roots,
            },
            steps: self.steps,
        }
    }

    /// Queues the pair formed by the live nodes at `left_pos` and `right_pos`
    /// if the ranker allows merging them.
    fn push_candidate(&mut self, left_pos: usize, right_pos: usize) {
        let (Some(left), Some(right)) = (self.slots[left_pos], self.slots[right_pos]) else {
            return;
        };
        if let Some(rank) = self
            .ranker
            .pair_rank(&self.nodes[left].symbol, &self.nodes[right].symbol)
        {
            self.heap.push(MergeCandidate {
                rank,
                position: left_pos,
                left,
                right,
            });
        }
    }

    fn next_live(&self, pos: usize) -> Option<usize> {
        (pos + 1..self.slots.len()).find(|&i| self.slots[i].is_some())
    }

    fn prev_live(&self, pos: usize) -> Option<usize> {
        (0..pos).rev().find(|&i| self.slots[i].is_some())
    }

    fn record_step(&mut self, merged: NodeId, rank: Rank) {
        let tokens_after = self
            .slots
            .iter()
            .flatten()
            .map(|&id| self.nodes[id].text())
            .collect();
        self.steps.push(MergeStep {
            step: self.steps.len() + 1,
            merged_token: self.nodes[merged].text(),
            rank,
            tokens_after,
        });
    }
}

/// Labels for the raw input bytes of `text` (see [`byte_label`]).
pub fn initial_byte_labels(text: &str) -> Vec<String> {
    text.bytes().map(byte_label).collect()
}

/// Nested view of one merge-tree node, for serialization.
struct NodeView<'a> {
    tree: &'a MergeTree,
    id: NodeId,
}

impl Serialize for NodeView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = &self.tree.nodes[self.id];
        let child = |id: NodeId| NodeView {
            tree: self.tree,
            id,
        };

        let mut s = serializer.serialize_struct("MergeNode", 5)?;
        s.serialize_field("token", &node.text())?;
        s.serialize_field("rank", &node.rank)?;
        s.serialize_field("is_leaf", &node.is_leaf())?;
        s.serialize_field("left", &node.children.map(|(l, _)| child(l)))?;
        s.serialize_field("right", &node.children.map(|(_, r)| child(r)))?;
        s.end()
    }
}

/// Serializes as the list of root trees, each nested through its children.
impl Serialize for MergeTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.roots.iter().map(|&id| NodeView { tree: self, id }))
    }
}
