//! The data a tokenizer exposes to the analyses.

use log::{debug, info};

use crate::{
    split::resolve_split,
    types::{MergeRule, RankTable, Vocab},
};

/// Read access to the parts of a tokenizer that merge analysis needs.
///
/// Non-BPE tokenizers return `None` from [`merge_ranks`](Self::merge_ranks)
/// and [`merges`](Self::merges); analyses that need them report
/// [`AnalysisError::UnsupportedTokenizer`](crate::AnalysisError::UnsupportedTokenizer).
pub trait TokenizerSource: Send + Sync {
    fn name(&self) -> &str;

    /// Every vocabulary entry with its id.
    fn vocab(&self) -> &Vocab;

    /// Symbol -> merge rank, if the tokenizer is rank based.
    fn merge_ranks(&self) -> Option<&RankTable>;

    /// Merge rules in creation order, if known.
    fn merges(&self) -> Option<&[MergeRule]>;
}

/// A fully in-memory tokenizer description.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenizer {
    name: String,
    vocab: Vocab,
    ranks: Option<RankTable>,
    merges: Option<Vec<MergeRule>>,
}

impl StaticTokenizer {
    pub fn new(
        name: impl Into<String>,
        vocab: Vocab,
        ranks: Option<RankTable>,
        merges: Option<Vec<MergeRule>>,
    ) -> Self {
        Self {
            name: name.into(),
            vocab,
            ranks,
            merges,
        }
    }

    /// Builds a tokenizer from a bare rank table, as tiktoken encodings ship.
    ///
    /// Token ids equal ranks. Merge rules are reconstructed in rank order from
    /// each multi-byte symbol's optimal split; symbols without a valid split
    /// contribute no rule.
    pub fn from_ranks(name: impl Into<String>, ranks: RankTable) -> Self {
        let name = name.into();
        let ordered = ranks.sorted_entries();

        let vocab = Vocab::new(ordered.iter().map(|&(symbol, rank)| (symbol.to_vec(), rank)));
        let merges: Vec<MergeRule> = ordered
            .iter()
            .filter(|(symbol, _)| symbol.len() > 1)
            .filter_map(|&(symbol, _)| resolve_split(symbol, &ranks))
            .map(|(left, right)| MergeRule::new(left, right))
            .collect();

        let unresolved = ordered.iter().filter(|(s, _)| s.len() > 1).count() - merges.len();
        if unresolved > 0 {
            debug!("{name}: {unresolved} multi-byte symbols have no valid split");
        }
        info!(
            "{name}: reconstructed {} merge rules from {} ranks",
            merges.len(),
            ranks.len()
        );

        Self {
            name,
            vocab,
            ranks: Some(ranks),
            merges: Some(merges),
        }
    }
}

impl TokenizerSource for StaticTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn merge_ranks(&self) -> Option<&RankTable> {
        self.ranks.as_ref()
    }

    fn merges(&self) -> Option<&[MergeRule]> {
        self.merges.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rank;

    fn table(entries: &[(&str, Rank)]) -> RankTable {
        entries
            .iter()
            .map(|(s, r)| (s.as_bytes().to_vec(), *r))
            .collect()
    }

    #[test]
    fn test_from_ranks_reconstructs_merges_in_rank_order() {
        let tok = StaticTokenizer::from_ranks(
            "toy",
            table(&[("a", 0), ("b", 1), ("c", 2), ("ab", 3), ("abc", 4), ("zz", 5)]),
        );
        let merges = tok.merges().expect("rank tables always yield merges");
        assert_eq!(
            merges,
            &[MergeRule::new(b"a".to_vec(), b"b".to_vec()), MergeRule::new(b"ab".to_vec(), b"c".to_vec())]
        );
        assert_eq!(tok.vocab().len(), 6);
        assert_eq!(tok.vocab().entries()[3], (b"ab".to_vec(), 3));
        assert!(tok.merge_ranks().is_some());
        assert_eq!(tok.name(), "toy");
    }

    #[test]
    fn test_parts_without_ranks() {
        let tok = StaticTokenizer::new(
            "wordpiece",
            Vocab::from_strings(vec![("[CLS]".to_string(), 0)]),
            None,
            None,
        );
        assert!(tok.merge_ranks().is_none());
        assert!(tok.merges().is_none());
    }
}
