//! Shared types for merge-structure analysis.
//!
//! These type aliases and small containers are the vocabulary every other
//! module speaks: byte-sequence symbols, merge ranks, token ids, the rank
//! table reconstructed from a tokenizer and its ordered merge rules.

use std::collections::HashMap;

use log::warn;

/// An immutable byte sequence treated as one unit at a given decomposition level.
///
/// Identity is the exact byte content: two symbols that decode to the same
/// text but differ in bytes are distinct.
pub type Symbol = Vec<u8>;

/// Merge priority. Lower values were merged earlier and are applied first.
pub type Rank = u32;

/// Identifier of a vocabulary entry.
pub type TokenId = u32;

/// Mapping from symbol to merge rank.
///
/// Ranks are expected to be unique; the reverse (rank -> symbol) index is
/// built once at construction so subtree lookups by rank are O(1).
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    ranks: HashMap<Symbol, Rank>,
    by_rank: HashMap<Rank, Symbol>,
}

impl RankTable {
    /// Builds a rank table from `(symbol, rank)` pairs.
    ///
    /// A later duplicate of the same symbol replaces the earlier one. When two
    /// symbols share a rank the reverse index keeps the shorter symbol (then the
    /// lexicographically smaller one) so lookups stay deterministic.
    pub fn new(entries: impl IntoIterator<Item = (Symbol, Rank)>) -> Self {
        let ranks: HashMap<Symbol, Rank> = entries.into_iter().collect();
        let mut by_rank: HashMap<Rank, Symbol> = HashMap::with_capacity(ranks.len());
        let mut duplicates = 0usize;

        for (symbol, &rank) in &ranks {
            let replace = match by_rank.get(&rank) {
                Some(existing) => {
                    duplicates += 1;
                    (symbol.len(), symbol) < (existing.len(), existing)
                }
                None => true,
            };
            if replace {
                by_rank.insert(rank, symbol.clone());
            }
        }

        if duplicates > 0 {
            warn!("rank table contains {duplicates} symbols sharing a rank with another symbol");
        }

        Self { ranks, by_rank }
    }

    /// Rank of `symbol`, if present.
    #[inline]
    pub fn get(&self, symbol: &[u8]) -> Option<Rank> {
        self.ranks.get(symbol).copied()
    }

    #[inline]
    pub fn contains(&self, symbol: &[u8]) -> bool {
        self.ranks.contains_key(symbol)
    }

    /// Symbol holding `rank`, if any.
    pub fn symbol_for_rank(&self, rank: Rank) -> Option<&[u8]> {
        self.by_rank.get(&rank).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Iterates `(symbol, rank)` in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Rank)> {
        self.ranks.iter().map(|(s, &r)| (s.as_slice(), r))
    }

    /// All entries ordered by ascending rank, ties broken by symbol bytes.
    pub fn sorted_entries(&self) -> Vec<(&[u8], Rank)> {
        let mut entries: Vec<(&[u8], Rank)> = self.iter().collect();
        entries.sort_unstable_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        entries
    }
}

impl FromIterator<(Symbol, Rank)> for RankTable {
    fn from_iter<I: IntoIterator<Item = (Symbol, Rank)>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// One ordered merge rule: `left + right` produces a new symbol.
///
/// Its rank is its position in the rule list (0 = first rule learned).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeRule {
    pub left: Symbol,
    pub right: Symbol,
}

impl MergeRule {
    pub fn new(left: impl Into<Symbol>, right: impl Into<Symbol>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// The symbol this rule produces.
    pub fn product(&self) -> Symbol {
        let mut out = Vec::with_capacity(self.left.len() + self.right.len());
        out.extend_from_slice(&self.left);
        out.extend_from_slice(&self.right);
        out
    }
}

/// The vocabulary of a tokenizer as `(symbol, id)` entries in ascending id order.
///
/// Id order is the encounter order used wherever results must be stable.
#[derive(Debug, Clone, Default)]
pub struct Vocab {
    entries: Vec<(Symbol, TokenId)>,
}

impl Vocab {
    pub fn new(entries: impl IntoIterator<Item = (Symbol, TokenId)>) -> Self {
        let mut entries: Vec<(Symbol, TokenId)> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }

    /// Builds a vocabulary keyed by display strings (UTF-8 encoded).
    pub fn from_strings(entries: impl IntoIterator<Item = (String, TokenId)>) -> Self {
        Self::new(entries.into_iter().map(|(s, id)| (s.into_bytes(), id)))
    }

    pub fn entries(&self) -> &[(Symbol, TokenId)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Renders bytes as text, substituting U+FFFD for invalid UTF-8.
#[inline]
pub fn display(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lowercase hex encoding of `bytes`.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        // writing into a String cannot fail
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Label for a single raw input byte: the character itself when printable
/// ASCII, `0xNN` otherwise.
pub fn byte_label(b: u8) -> String {
    if (0x20..0x7f).contains(&b) {
        char::from(b).to_string()
    } else {
        format!("0x{b:02x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_table_lookups() {
        let table = RankTable::new(vec![(b"a".to_vec(), 0), (b"b".to_vec(), 1), (b"ab".to_vec(), 2)]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(b"ab"), Some(2));
        assert_eq!(table.get(b"ba"), None);
        assert_eq!(table.symbol_for_rank(1), Some(&b"b"[..]));
        assert_eq!(table.symbol_for_rank(9), None);
    }

    #[test]
    fn test_sorted_entries_follow_rank() {
        let table = RankTable::new(vec![(b"ab".to_vec(), 2), (b"b".to_vec(), 1), (b"a".to_vec(), 0)]);
        let ranks: Vec<Rank> = table.sorted_entries().iter().map(|(_, r)| *r).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
    }

    #[test]
    fn test_duplicate_rank_keeps_shorter_symbol() {
        let table = RankTable::new(vec![(b"xy".to_vec(), 5), (b"z".to_vec(), 5)]);
        assert_eq!(table.symbol_for_rank(5), Some(&b"z"[..]));
    }

    #[test]
    fn test_merge_rule_product() {
        let rule = MergeRule::new(b"he".to_vec(), b"llo".to_vec());
        assert_eq!(rule.product(), b"hello".to_vec());
    }

    #[test]
    fn test_vocab_sorted_by_id() {
        let vocab = Vocab::from_strings(vec![("c".to_string(), 2), ("a".to_string(), 0), ("b".to_string(), 1)]);
        let ids: Vec<TokenId> = vocab.entries().iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_display_helpers() {
        assert_eq!(display(b"hi"), "hi");
        assert_eq!(display(&[0x80]), "\u{FFFD}");
        assert_eq!(to_hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(byte_label(b'a'), "a");
        assert_eq!(byte_label(b'\n'), "0x0a");
        assert_eq!(byte_label(0xe6), "0xe6");
    }
}
