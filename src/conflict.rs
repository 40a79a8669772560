//! Cross-tokenizer conflict analysis.
//!
//! Two tokenizers are merge-compatible on a text when simulating both yields
//! exactly the same set of intermediate (merge-result) tokens. Any token one
//! side builds and the other never does is a conflict.

use std::collections::BTreeSet;

use log::debug;
use serde::Serialize;

use crate::{
    simulator::{initial_byte_labels, simulate, MergeNode, MergeStep, MergeTree, Simulation},
    types::RankTable,
};

/// Set difference of the intermediate tokens of two merge trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    #[serde(rename = "shared_intermediates")]
    pub shared: BTreeSet<String>,
    pub only_a: BTreeSet<String>,
    pub only_b: BTreeSet<String>,
    pub is_compatible: bool,
    pub conflict_count: usize,
}

impl ConflictReport {
    /// Compares two sets of intermediate tokens.
    pub fn from_sets(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Self {
        let shared: BTreeSet<String> = a.intersection(b).cloned().collect();
        let only_a: BTreeSet<String> = a.difference(b).cloned().collect();
        let only_b: BTreeSet<String> = b.difference(a).cloned().collect();
        let conflict_count = only_a.len() + only_b.len();

        Self {
            shared,
            only_a,
            only_b,
            is_compatible: conflict_count == 0,
            conflict_count,
        }
    }
}

/// Display text of every internal node of `tree`.
pub fn intermediates(tree: &MergeTree) -> BTreeSet<String> {
    tree.internal_nodes().map(MergeNode::text).collect()
}

/// Simulates `text` under both rank tables and diffs their intermediates.
pub fn compare(text: &str, ranks_a: &RankTable, ranks_b: &RankTable) -> ConflictReport {
    let a = simulate(text, ranks_a);
    let b = simulate(text, ranks_b);
    ConflictReport::from_sets(&intermediates(&a.tree), &intermediates(&b.tree))
}

/// The simulation of one side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenizerTrace {
    pub name: String,
    #[serde(rename = "trees")]
    pub tree: MergeTree,
    pub steps: Vec<MergeStep>,
    pub final_tokens: Vec<String>,
}

impl TokenizerTrace {
    fn new(name: &str, sim: Simulation, initial: &[String]) -> Self {
        let final_tokens = match sim.steps.last() {
            Some(step) => step.tokens_after.clone(),
            None => initial.to_vec(),
        };
        Self {
            name: name.to_string(),
            tree: sim.tree,
            steps: sim.steps,
            final_tokens,
        }
    }
}

/// Full side-by-side comparison of two tokenizers on one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeTreeComparison {
    pub text: String,
    pub initial_bytes: Vec<String>,
    pub tokenizer_a: TokenizerTrace,
    pub tokenizer_b: TokenizerTrace,
    #[serde(rename = "conflict_analysis")]
    pub conflict: ConflictReport,
}

/// Simulates `text` under both rank tables and returns both traces together
/// with their conflict report.
///
/// # Arguments
///
/// * `text` - Text both tokenizers reduce.
/// * `ranks_a`, `ranks_b` - Rank tables of the two sides.
/// * `name_a`, `name_b` - Labels written into each side's trace.
pub fn compare_tokenizers(
    text: &str,
    ranks_a: &RankTable,
    ranks_b: &RankTable,
    name_a: &str,
    name_b: &str,
) -> MergeTreeComparison {
    let sim_a = simulate(text, ranks_a);
    let sim_b = simulate(text, ranks_b);
    let conflict = ConflictReport::from_sets(&intermediates(&sim_a.tree), &intermediates(&sim_b.tree));

    debug!(
        "compared {name_a} and {name_b} on {} bytes: {} shared, {} conflicts",
        text.len(),
        conflict.shared.len(),
        conflict.conflict_count
    );

    let initial_bytes = initial_byte_labels(text);
    MergeTreeComparison {
        text: text.to_string(),
        tokenizer_a: TokenizerTrace::new(name_a, sim_a, &initial_bytes),
        tokenizer_b: TokenizerTrace::new(name_b, sim_b, &initial_bytes),
        initial_bytes,
        conflict,
    }
}
