//! Per-tokenizer registry with memoized analyses.
//!
//! Forests and undertrained findings are computed at most once per tokenizer
//! id and shared as `Arc`s. Registering a tokenizer under an existing id drops
//! everything cached for that id.
//!
//! Analyses run without any cache lock held: they fan out over rayon, and a
//! rayon worker that re-enters the registry must not find a shard locked by
//! the thread waiting on it. When two callers race on a cold id the first
//! stored result wins and both get it.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};

use crate::{
    conflict::{compare, compare_tokenizers, ConflictReport, MergeTreeComparison},
    error::{AnalysisError, Capability, Lookup},
    forest::{build_forest_with_progress, subtree_by_rank, Forest, Subtree},
    simulator::{simulate, Simulation},
    source::TokenizerSource,
    types::{Rank, RankTable},
    undertrained::{DetectorConfig, Finding, UndertrainedDetector},
};

/// Settings shared by every analysis an [`Analyzer`] runs.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerConfig {
    pub detector: DetectorConfig,
    /// Draw a progress bar while building forests.
    pub show_progress: bool,
}

/// Registry of tokenizers and their cached analyses.
pub struct Analyzer {
    config: AnalyzerConfig,
    sources: DashMap<String, Arc<dyn TokenizerSource>>,
    forests: DashMap<String, Arc<Forest>>,
    findings: DashMap<String, Arc<Vec<Finding>>>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            sources: DashMap::new(),
            forests: DashMap::new(),
            findings: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Registers `source` under `id`, replacing and invalidating any previous one.
    pub fn register(&self, id: impl Into<String>, source: impl TokenizerSource + 'static) {
        let id = id.into();
        self.invalidate(&id);
        debug!("registered tokenizer {id:?} ({})", source.name());
        self.sources.insert(id, Arc::new(source));
    }

    /// Removes `id` and its cached analyses. Returns whether it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.invalidate(id);
        self.sources.remove(id).is_some()
    }

    /// Drops cached analyses for `id`; the next request recomputes them.
    pub fn invalidate(&self, id: &str) {
        self.forests.remove(id);
        self.findings.remove(id);
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort_unstable();
        ids
    }

    /// The tokenizer registered under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::NotFound`] if nothing is registered under `id`.
    pub fn source(&self, id: &str) -> Result<Arc<dyn TokenizerSource>, AnalysisError> {
        self.sources
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AnalysisError::NotFound(Lookup::Tokenizer(id.to_string())))
    }

    /// The full merge forest of `id`, built on first request.
    ///
    /// # Returns
    ///
    /// A shared handle to the cached forest. Every caller gets the same `Arc`
    /// until `id` is invalidated.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::NotFound`] for an unknown id,
    /// [`AnalysisError::UnsupportedTokenizer`] if it has no rank table.
    pub fn forest(&self, id: &str) -> Result<Arc<Forest>, AnalysisError> {
        if let Some(forest) = self.forests.get(id) {
            return Ok(Arc::clone(forest.value()));
        }

        let source = self.source(id)?;
        let ranks = require_ranks(id, source.as_ref())?;

        info!("building merge forest for {id:?}");
        let built = Arc::new(build_forest_with_progress(ranks, self.config.show_progress)?);
        Ok(Arc::clone(self.forests.entry(id.to_string()).or_insert(built).value()))
    }

    /// The merge subtree of the symbol holding `rank` in `id`'s rank table.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::NotFound`] for an unknown id or rank,
    /// [`AnalysisError::UnsupportedTokenizer`] if it has no rank table.
    pub fn subtree(&self, id: &str, rank: Rank) -> Result<Subtree, AnalysisError> {
        let source = self.source(id)?;
        subtree_by_rank(require_ranks(id, source.as_ref())?, rank)
    }

    /// Greedy merge simulation of `text` under `id`'s rank table.
    ///
    /// # Errors
    ///
    /// Same as [`subtree`](Self::subtree), minus the rank lookup.
    pub fn simulate(&self, id: &str, text: &str) -> Result<Simulation, AnalysisError> {
        let source = self.source(id)?;
        Ok(simulate(text, require_ranks(id, source.as_ref())?))
    }

    /// Intermediate-token conflicts between two tokenizers on `text`.
    ///
    /// # Errors
    ///
    /// Fails if either id is unknown or has no rank table.
    pub fn conflicts(&self, text: &str, id_a: &str, id_b: &str) -> Result<ConflictReport, AnalysisError> {
        let (a, b) = (self.source(id_a)?, self.source(id_b)?);
        Ok(compare(
            text,
            require_ranks(id_a, a.as_ref())?,
            require_ranks(id_b, b.as_ref())?,
        ))
    }

    /// Both merge traces of `text` plus their conflict report.
    ///
    /// Each side is labelled with its registry id.
    ///
    /// # Errors
    ///
    /// Fails if either id is unknown or has no rank table.
    pub fn compare(&self, text: &str, id_a: &str, id_b: &str) -> Result<MergeTreeComparison, AnalysisError> {
        let (a, b) = (self.source(id_a)?, self.source(id_b)?);
        Ok(compare_tokenizers(
            text,
            require_ranks(id_a, a.as_ref())?,
            require_ranks(id_b, b.as_ref())?,
            id_a,
            id_b,
        ))
    }

    /// Undertrained findings of `id`, computed on first request.
    ///
    /// # Errors
    ///
    /// [`AnalysisError::NotFound`] for an unknown id,
    /// [`AnalysisError::UnsupportedTokenizer`] if it exposes no merge rules,
    /// [`AnalysisError::InvalidPattern`] for a bad special-token pattern.
    pub fn undertrained(&self, id: &str) -> Result<Arc<Vec<Finding>>, AnalysisError> {
        if let Some(findings) = self.findings.get(id) {
            return Ok(Arc::clone(findings.value()));
        }

        let source = self.source(id)?;
        let rules = source
            .merges()
            .ok_or_else(|| unsupported(id, Capability::MergeRules))?;

        info!("scanning {id:?} for undertrained tokens");
        let detector = UndertrainedDetector::new(rules, &self.config.detector)?;
        let scanned = Arc::new(detector.detect(source.vocab())?);
        Ok(Arc::clone(self.findings.entry(id.to_string()).or_insert(scanned).value()))
    }
}

fn require_ranks<'a>(id: &str, source: &'a dyn TokenizerSource) -> Result<&'a RankTable, AnalysisError> {
    source
        .merge_ranks()
        .ok_or_else(|| unsupported(id, Capability::MergeRanks))
}

fn unsupported(id: &str, missing: Capability) -> AnalysisError {
    AnalysisError::UnsupportedTokenizer {
        tokenizer: id.to_string(),
        missing,
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;
    use crate::{
        source::StaticTokenizer,
        types::{MergeRule, Symbol, Vocab},
    };

    fn toy(entries: &[(&str, Rank)]) -> StaticTokenizer {
        let ranks: RankTable = entries
            .iter()
            .map(|(s, r)| (Symbol::from(s.as_bytes()), *r))
            .collect();
        StaticTokenizer::from_ranks("toy", ranks)
    }

    fn analyzer() -> Analyzer {
        let analyzer = Analyzer::default();
        analyzer.register("a", toy(&[("a", 0), ("b", 1), ("c", 2), ("ab", 3), ("abc", 4)]));
        analyzer.register("b", toy(&[("a", 0), ("b", 1), ("c", 2), ("bc", 3), ("abc", 4)]));
        analyzer.register(
            "wp",
            StaticTokenizer::new("wp", Vocab::from_strings(vec![("hi".to_string(), 0)]), None, None),
        );
        analyzer
    }

    #[test]
    fn test_ids_sorted() {
        assert_eq!(analyzer().ids(), vec!["a", "b", "wp"]);
    }

    #[test]
    fn test_forest_is_cached() {
        let analyzer = analyzer();
        let first = analyzer.forest("a").expect("forest should build");
        let second = analyzer.forest("a").expect("forest should be cached");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn test_reregister_invalidates() {
        let analyzer = analyzer();
        let before = analyzer.forest("a").expect("forest should build");
        analyzer.register("a", toy(&[("x", 0)]));
        let after = analyzer.forest("a").expect("forest should rebuild");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn test_unknown_tokenizer() {
        let analyzer = analyzer();
        assert!(matches!(
            analyzer.forest("missing"),
            Err(AnalysisError::NotFound(Lookup::Tokenizer(id))) if id == "missing"
        ));
        assert!(!analyzer.unregister("missing"));
    }

    #[test]
    fn test_unsupported_tokenizer() {
        let analyzer = analyzer();
        assert!(matches!(
            analyzer.subtree("wp", 0),
            Err(AnalysisError::UnsupportedTokenizer {
                missing: Capability::MergeRanks,
                ..
            })
        ));
        assert!(matches!(
            analyzer.undertrained("wp"),
            Err(AnalysisError::UnsupportedTokenizer {
                missing: Capability::MergeRules,
                ..
            })
        ));
    }

    #[test]
    fn test_subtree_by_rank() {
        let analyzer = analyzer();
        let tree = analyzer.subtree("a", 4).expect("rank 4 exists");
        assert_eq!(tree.root().symbol, b"abc".to_vec());
        assert_eq!(tree.node_count(), 5);
        assert!(matches!(
            analyzer.subtree("a", 99),
            Err(AnalysisError::NotFound(Lookup::Rank(99)))
        ));
    }

    #[test]
    fn test_compare_labels_sides_by_id() {
        let analyzer = analyzer();
        let cmp = analyzer.compare("abc", "a", "b").expect("both have ranks");
        assert_eq!(cmp.tokenizer_a.name, "a");
        assert_eq!(cmp.conflict.conflict_count, 2);

        let report = analyzer.conflicts("abc", "a", "a").expect("same tokenizer");
        assert!(report.is_compatible);
    }

    #[test]
    fn test_undertrained_cached() {
        let analyzer = analyzer();
        let first = analyzer.undertrained("a").expect("scan should run");
        let second = analyzer.undertrained("a").expect("scan should be cached");
        assert!(Arc::ptr_eq(&first, &second));
        // rules reconstructed from the ranks rebuild every entry
        assert!(first.is_empty());
    }

    #[test]
    fn test_simulate_through_registry() {
        let analyzer = analyzer();
        let sim = analyzer.simulate("a", "abc").expect("ranks available");
        assert_eq!(sim.tree.final_tokens(), vec!["abc"]);
        assert_eq!(sim.steps.len(), 2);
    }

    #[test]
    fn test_concurrent_requests_share_one_result() {
        let analyzer = analyzer();
        let forests: Vec<Arc<Forest>> = (0..32)
            .into_par_iter()
            .map(|_| analyzer.forest("a").expect("forest should build"))
            .collect();
        let cached = analyzer.forest("a").expect("forest should be cached");
        assert!(forests.iter().all(|f| Arc::ptr_eq(f, &cached)));

        let findings: Vec<Arc<Vec<Finding>>> = (0..32)
            .into_par_iter()
            .map(|_| analyzer.undertrained("b").expect("scan should run"))
            .collect();
        let cached = analyzer.undertrained("b").expect("scan should be cached");
        assert!(findings.iter().all(|f| Arc::ptr_eq(f, &cached)));
    }

    #[test]
    fn test_reentrant_request_from_rayon_worker() {
        let analyzer = analyzer();
        // the outer scan holds a rayon worker while the inner build fans out
        let sizes: Vec<usize> = ["a", "b"]
            .par_iter()
            .map(|id| {
                let findings = analyzer.undertrained(id).expect("scan should run");
                let forest = analyzer.forest(id).expect("forest should build");
                forest.len() + findings.len()
            })
            .collect();
        assert_eq!(sizes, vec![5, 5]);
    }

    #[test]
    fn test_empty_rule_list_is_scanned() {
        let analyzer = analyzer();
        let vocab = Vocab::from_strings(vec![("a".into(), 0), ("b".into(), 1), ("ab".into(), 2)]);
        let ranks: RankTable = vocab.entries().iter().cloned().collect();
        analyzer.register(
            "bare",
            StaticTokenizer::new("bare", vocab, Some(ranks), Some(Vec::<MergeRule>::new())),
        );
        let findings = analyzer.undertrained("bare").expect("empty rules still scan");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].token, "ab");
    }
}
