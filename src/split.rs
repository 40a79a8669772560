//! Optimal-split resolver.
//!
//! Reconstructs the merge that most likely produced a token when only the
//! rank table is known. The final merge of a token joins two halves that both
//! exist in the table; of all candidate halves, the one whose slower (higher
//! rank) child was ready earliest wins, i.e. the split minimising
//! `max(rank(left), rank(right))`.

use log::debug;

use crate::{
    error::AnalysisError,
    types::{Rank, RankTable},
};

/// A resolved split: `(left, right)` borrowed from the token being split.
pub type Split<'a> = (&'a [u8], &'a [u8]);

/// Finds the optimal binary split of `token`.
///
/// A split point scores the larger rank of its two halves; the lowest score
/// wins. On equal scores the leftmost split point is kept.
///
/// # Arguments
///
/// * `token` - The byte sequence to split.
/// * `ranks` - Rank table both halves are looked up in.
///
/// # Returns
///
/// `Ok(Some((left, right)))` borrowing from `token`, or `Ok(None)` when the
/// token is a single byte or no split point has both halves in `ranks`.
///
/// # Errors
///
/// Returns [`AnalysisError::InvalidInput`] for an empty token.
pub(crate) fn try_resolve_split<'a>(
    token: &'a [u8],
    ranks: &RankTable,
) -> Result<Option<Split<'a>>, AnalysisError> {
    if token.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "cannot split a zero-length symbol".to_string(),
        ));
    }

    let mut best: Option<(Rank, usize)> = None;

    for i in 1..token.len() {
        let (left, right) = token.split_at(i);
        let (Some(left_rank), Some(right_rank)) = (ranks.get(left), ranks.get(right)) else {
            continue;
        };

        let score = left_rank.max(right_rank);
        // strict comparison: an equal later score never replaces an earlier split
        if best.map_or(true, |(best_score, _)| score < best_score) {
            best = Some((score, i));
        }
    }

    Ok(best.map(|(_, i)| token.split_at(i)))
}

/// Finds the optimal binary split of `token`, or `None` if it has none.
///
/// Empty input is treated as an unsplittable leaf.
pub fn resolve_split<'a>(token: &'a [u8], ranks: &RankTable) -> Option<Split<'a>> {
    match try_resolve_split(token, ranks) {
        Ok(split) => split,
        Err(e) => {
            debug!("resolve_split: {e}; treating as leaf");
            None
        }
    }
}
