//! Undertrained-token detection.
//!
//! A vocabulary entry is suspicious when the tokenizer's own merge process
//! could never have produced it: replaying the ordered merge rules over its
//! bytes does not rebuild it, no rule produces it, or its bytes are not
//! well-formed text. Such rows exist in the embedding table but were never
//! reinforced during training.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use fancy_regex::Regex;
use indicatif::ParallelProgressIterator;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Serialize, Serializer};

use crate::{
    error::AnalysisError,
    progress::progress_bar,
    simulator::{reduce, PairRanker},
    types::{display, to_hex, MergeRule, Rank, Symbol, TokenId, Vocab},
};

/// Matches reserved/special markers such as `<unk>` or `<|endoftext|>`.
pub const DEFAULT_SPECIAL_TOKEN_PATTERN: &str = r"(?s)^<.*>$";

/// Configuration for [`UndertrainedDetector`].
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Entries whose display text matches this pattern are skipped.
    pub special_token_pattern: String,
    /// Draw a progress bar while scanning the vocabulary.
    pub show_progress: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            special_token_pattern: DEFAULT_SPECIAL_TOKEN_PATTERN.to_string(),
            show_progress: false,
        }
    }
}

/// Ordered merge rules indexed for lookup.
///
/// Ranks are rule positions (0 = first rule). If the same pair appears twice
/// the earlier position is kept.
#[derive(Debug, Clone, Default)]
pub struct MergeRuleTable {
    ranks: HashMap<Symbol, HashMap<Symbol, Rank>>,
    products: HashSet<Symbol>,
    len: usize,
}

impl MergeRuleTable {
    pub fn new(rules: &[MergeRule]) -> Self {
        let mut ranks: HashMap<Symbol, HashMap<Symbol, Rank>> = HashMap::new();
        let mut products = HashSet::with_capacity(rules.len());

        for (rank, rule) in rules.iter().enumerate() {
            ranks
                .entry(rule.left.clone())
                .or_default()
                .entry(rule.right.clone())
                .or_insert(rank as Rank);
            products.insert(rule.product());
        }

        Self {
            ranks,
            products,
            len: rules.len(),
        }
    }

    /// Whether some rule concatenates to `symbol`.
    pub fn produces(&self, symbol: &[u8]) -> bool {
        self.products.contains(symbol)
    }

    /// Number of rules the table was built from.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PairRanker for MergeRuleTable {
    fn pair_rank(&self, left: &[u8], right: &[u8]) -> Option<Rank> {
        self.ranks.get(left)?.get(right).copied()
    }
}

/// Why an entry was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// Replaying the merge rules over its bytes does not rebuild it.
    Unreachable,
    /// No merge rule concatenates to it.
    NeverProduced,
    /// It contains control bytes, DEL, or invalid UTF-8.
    UnusualBytes,
    /// Its bytes are not valid UTF-8.
    IncompleteUtf8,
}

impl Reason {
    pub fn confidence(self) -> f64 {
        match self {
            Self::Unreachable => 0.8,
            Self::NeverProduced => 0.6,
            Self::UnusualBytes => 0.5,
            Self::IncompleteUtf8 => 0.7,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unreachable => "unreachable via BPE merges",
            Self::NeverProduced => "not a product of any merge rule",
            Self::UnusualBytes => "contains unusual byte sequences",
            Self::IncompleteUtf8 => "incomplete UTF-8 sequence",
        })
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A flagged vocabulary entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub token_id: TokenId,
    #[serde(rename = "token_str")]
    pub token: String,
    #[serde(rename = "token_bytes_hex")]
    pub token_hex: String,
    pub reasons: Vec<Reason>,
    /// All reasons joined with `"; "`.
    pub reason: String,
    /// Highest confidence among `reasons`.
    pub confidence: f64,
    /// The entry itself: what a faithful merge process would end at.
    pub expected_merge_path: Vec<String>,
    /// The pieces the merge rules actually reduce the entry's bytes to.
    pub actual_merge_result: Vec<String>,
}

/// Flags vocabulary entries the merge rules could not have produced.
#[derive(Debug)]
pub struct UndertrainedDetector {
    rules: MergeRuleTable,
    special: Regex,
    show_progress: bool,
}

impl UndertrainedDetector {
    /// Indexes `rules` (in creation order) for detection.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidPattern`] if the configured special-token
    /// pattern fails to compile.
    pub fn new(rules: &[MergeRule], config: &DetectorConfig) -> Result<Self, AnalysisError> {
        Ok(Self {
            rules: MergeRuleTable::new(rules),
            special: Regex::new(&config.special_token_pattern)?,
            show_progress: config.show_progress,
        })
    }

    pub fn rules(&self) -> &MergeRuleTable {
        &self.rules
    }

    /// Scans `vocab` and returns findings by descending confidence.
    ///
    /// Ties keep vocabulary (token id) order. Single-byte entries form the base
    /// alphabet and are never reported; neither are special markers.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::ProgressBarSetup`] if the progress bar template
    /// fails to compile.
    pub fn detect(&self, vocab: &Vocab) -> Result<Vec<Finding>, AnalysisError> {
        let base_alphabet: HashMap<u8, TokenId> = vocab
            .entries()
            .iter()
            .filter_map(|(symbol, id)| match symbol.as_slice() {
                [b] => Some((*b, *id)),
                _ => None,
            })
            .collect();

        let candidates: Vec<&(Symbol, TokenId)> = vocab
            .entries()
            .iter()
            .filter(|(symbol, _)| symbol.len() > 1 && !self.is_special(symbol))
            .collect();

        debug!(
            "undertrained scan: {} base bytes, {} multi-byte candidates, {} rules",
            base_alphabet.len(),
            candidates.len(),
            self.rules.len()
        );

        let pb = progress_bar(candidates.len(), "Scanning vocabulary", self.show_progress)?;
        let mut findings: Vec<Finding> = candidates
            .par_iter()
            .progress_with(pb)
            .filter_map(|(symbol, id)| self.inspect(symbol, *id))
            .collect();

        // stable: equal confidences keep token id order
        findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        info!(
            "undertrained scan finished: {} of {} entries flagged",
            findings.len(),
            vocab.len()
        );
        Ok(findings)
    }

    /// Runs every check on one entry.
    ///
    /// # Arguments
    ///
    /// * `symbol` - The entry's raw bytes.
    /// * `token_id` - Its id, copied into the finding.
    ///
    /// # Returns
    ///
    /// `None` if no check triggered, otherwise a finding carrying every
    /// triggered reason and the highest of their confidences.
    pub fn inspect(&self, symbol: &[u8], token_id: TokenId) -> Option<Finding> {
        if symbol.len() <= 1 {
            return None;
        }

        let pieces = reduce(symbol, &self.rules);
        let mut reasons = Vec::new();

        if !(pieces.len() == 1 && pieces[0] == symbol) {
            reasons.push(Reason::Unreachable);
        }
        if !self.rules.produces(symbol) {
            reasons.push(Reason::NeverProduced);
        }

        let valid_utf8 = std::str::from_utf8(symbol).is_ok();
        if !valid_utf8 || has_control_bytes(symbol) {
            reasons.push(Reason::UnusualBytes);
        }
        if !valid_utf8 {
            reasons.push(Reason::IncompleteUtf8);
        }

        if reasons.is_empty() {
            return None;
        }

        let confidence = reasons
            .iter()
            .map(|r| r.confidence())
            .fold(0.0, f64::max);
        let reason = reasons
            .iter()
            .map(Reason::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let token = display(symbol);

        Some(Finding {
            token_id,
            token_hex: to_hex(symbol),
            reasons,
            reason,
            confidence,
            expected_merge_path: vec![token.clone()],
            actual_merge_result: pieces.iter().map(|p| display(p)).collect(),
            token,
        })
    }

    fn is_special(&self, symbol: &[u8]) -> bool {
        let text = display(symbol);
        match self.special.is_match(&text) {
            Ok(matched) => matched,
            Err(e) => {
                debug!("special token pattern failed on {text:?}: {e}");
                false
            }
        }
    }
}

/// Control bytes other than tab, LF and CR, or DEL.
fn has_control_bytes(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .any(|&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7f)
}

/// Detects undertrained entries of `vocab` with the default configuration.
///
/// # Arguments
///
/// * `vocab` - Every vocabulary entry with its id.
/// * `rules` - Merge rules in creation order, or `None` when the tokenizer
///   does not expose them.
///
/// # Returns
///
/// No findings when `rules` is `None`. An empty rule list is still a merge
/// process: it can build nothing, so every multi-byte entry is flagged, the
/// same as [`Analyzer::undertrained`](crate::Analyzer::undertrained) does
/// for a tokenizer whose merge list is empty.
pub fn detect(vocab: &Vocab, rules: Option<&[MergeRule]>) -> Result<Vec<Finding>, AnalysisError> {
    match rules {
        Some(rules) => UndertrainedDetector::new(rules, &DetectorConfig::default())?.detect(vocab),
        None => Ok(Vec::new()),
    }
}
