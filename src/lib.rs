//! Merge-structure analysis for byte-pair-encoding tokenizers.
//!
//! Given a tokenizer's rank table or ordered merge rules this crate
//! reconstructs how every vocabulary entry was built ([`forest`]), replays
//! greedy BPE over a text to expose its merge tree ([`simulator`]), diffs the
//! merge trees of two tokenizers ([`conflict`]) and flags entries the merge
//! process could never have produced ([`undertrained`]).
//!
//! With the `python` feature it also builds the `mergelens` extension module.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]

pub mod analyzer;
pub mod conflict;
pub mod error;
pub mod forest;
pub mod loader;
mod progress;
pub mod query;
pub mod simulator;
pub mod source;
pub mod split;
pub mod types;
pub mod undertrained;

#[cfg(feature = "python")]
mod python;

pub use analyzer::{Analyzer, AnalyzerConfig};
pub use conflict::{compare, compare_tokenizers, ConflictReport, MergeTreeComparison};
pub use error::{AnalysisError, Capability, LoadError, Lookup};
pub use forest::{build_forest, subtree, subtree_by_rank, Forest, MergeEntry, Subtree};
pub use query::{paginate, EntryFilter, ForestPage, ForestQuery, Page, SortKey};
pub use simulator::{simulate, MergeStep, MergeTree, PairRanker, Simulation};
pub use source::{StaticTokenizer, TokenizerSource};
pub use split::resolve_split;
pub use types::{MergeRule, Rank, RankTable, Symbol, TokenId, Vocab};
pub use undertrained::{detect, DetectorConfig, Finding, Reason, UndertrainedDetector};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn mergelens(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyMergeLens>()?;
    Ok(())
}
