use mergelens::{
    loader::load_hf_json, Analyzer, AnalysisError, Capability, EntryFilter, ForestQuery, Lookup,
    Reason, StaticTokenizer, TokenizerSource,
};

/// Byte-level BPE in the GPT-2 alphabet: `Ġ` is a space.
///
/// `Ġt` is listed in the vocabulary but no merge produces it, and `xy` is an
/// orphan entry with neither base byte present.
const GPT_STYLE: &str = r#"{
    "version": "1.0",
    "added_tokens": [{"id": 12, "content": "<|endoftext|>", "special": true}],
    "model": {
        "type": "BPE",
        "dropout": null,
        "vocab": {
            "Ġ": 0, "t": 1, "h": 2, "e": 3,
            "th": 4, "the": 5, "Ġthe": 6, "he": 7,
            "Ġt": 8, "xy": 9, "Ġth": 10, "ee": 11
        },
        "merges": ["t h", "th e", "Ġ the", "h e", "e e"]
    }
}"#;

/// Same byte alphabet, different merge order: `he` is learned before `th`.
const HE_FIRST: &str = r#"{
    "model": {
        "type": "BPE",
        "vocab": {"Ġ": 0, "t": 1, "h": 2, "e": 3, "he": 4, "the": 5, "Ġthe": 6},
        "merges": [["h", "e"], ["t", "he"], ["Ġ", "the"]]
    }
}"#;

fn analyzer() -> Analyzer {
    let analyzer = Analyzer::default();
    analyzer.register(
        "gpt",
        load_hf_json("gpt", GPT_STYLE).expect("gpt-style tokenizer should load"),
    );
    analyzer.register(
        "he-first",
        load_hf_json("he-first", HE_FIRST).expect("he-first tokenizer should load"),
    );
    analyzer
}

#[test]
fn test_forest_over_loaded_tokenizer() {
    let analyzer = analyzer();
    let forest = analyzer.forest("gpt").expect("forest should build");

    // the special token is excluded from the rank table
    assert_eq!(forest.len(), 12);

    let the = forest.get(b" the").expect("\" the\" is in the forest");
    assert_eq!(the.children(), Some((&b" "[..], &b"the"[..])));
    assert!(the.is_root);

    let orphan = forest.get(b"xy").expect("xy is in the forest");
    assert!(orphan.is_leaf());
    assert!(!orphan.is_atomic());

    let roots = ForestQuery {
        filter: EntryFilter::Roots,
        ..ForestQuery::default()
    }
    .apply(&forest);
    let root_texts: Vec<String> = roots.entries.iter().map(|e| e.text()).collect();
    assert_eq!(root_texts, vec![" the", "he", " t", "xy", " th", "ee"]);
}

#[test]
fn test_subtree_of_space_the() {
    let analyzer = analyzer();
    let tree = analyzer.subtree("gpt", 6).expect("rank 6 exists");
    // " the" -> " " + "the" -> "th" + "e" -> "t" + "h"
    assert_eq!(tree.node_count(), 7);
    assert_eq!(tree.depth(), 4);

    let json = serde_json::to_value(&tree).expect("subtree should serialize");
    assert_eq!(json["root"]["token"], " the");
}

#[test]
fn test_compare_merge_orders() {
    let analyzer = analyzer();
    let cmp = analyzer.compare(" the", "gpt", "he-first").expect("both are BPE");

    assert_eq!(cmp.initial_bytes, vec![" ", "t", "h", "e"]);
    assert_eq!(cmp.tokenizer_a.final_tokens, vec![" the"]);
    assert_eq!(cmp.tokenizer_b.final_tokens, vec![" the"]);

    let shared: Vec<&str> = cmp.conflict.shared.iter().map(String::as_str).collect();
    assert_eq!(shared, vec![" the", "the"]);
    assert!(cmp.conflict.only_a.contains("th"));
    assert!(cmp.conflict.only_b.contains("he"));
    assert!(!cmp.conflict.is_compatible);
}

#[test]
fn test_undertrained_findings() {
    let analyzer = analyzer();
    let findings = analyzer.undertrained("gpt").expect("gpt exposes merges");

    let tokens: Vec<&str> = findings.iter().map(|f| f.token.as_str()).collect();
    // "Ġt", "xy" and "Ġth" are built by no rule; "<|endoftext|>" is skipped
    assert_eq!(tokens, vec![" t", "xy", " th"]);
    for f in findings.iter() {
        assert_eq!(f.reasons, vec![Reason::Unreachable, Reason::NeverProduced]);
        assert_eq!(f.confidence, 0.8);
    }
    assert_eq!(findings[0].actual_merge_result, vec![" ", "t"]);
}

#[test]
fn test_non_bpe_tokenizer() {
    let analyzer = analyzer();
    let json = r#"{"model": {"type": "WordPiece", "vocab": {"[UNK]": 0, "the": 1}}}"#;
    analyzer.register("bert", load_hf_json("bert", json).expect("wordpiece should load"));

    assert!(matches!(
        analyzer.forest("bert"),
        Err(AnalysisError::UnsupportedTokenizer {
            missing: Capability::MergeRanks,
            ..
        })
    ));
    assert!(matches!(
        analyzer.undertrained("bert"),
        Err(AnalysisError::UnsupportedTokenizer {
            missing: Capability::MergeRules,
            ..
        })
    ));
    assert!(matches!(
        analyzer.compare("the", "gpt", "bert"),
        Err(AnalysisError::UnsupportedTokenizer { tokenizer, .. }) if tokenizer == "bert"
    ));
}

#[test]
fn test_raw_rank_table_registration() {
    let analyzer = analyzer();
    let ranks = [(b"a".to_vec(), 0), (b"b".to_vec(), 1), (b"ab".to_vec(), 2)]
        .into_iter()
        .collect();
    let tokenizer = StaticTokenizer::from_ranks("tiny", ranks);
    assert_eq!(tokenizer.merges().map(|m| m.len()), Some(1));
    analyzer.register("tiny", tokenizer);

    let sim = analyzer.simulate("tiny", "ab").expect("tiny has ranks");
    assert_eq!(sim.steps.len(), 1);
    assert_eq!(sim.steps[0].merged_token, "ab");
    assert_eq!(sim.steps[0].rank, 2);

    assert!(analyzer.unregister("tiny"));
    assert!(matches!(
        analyzer.simulate("tiny", "ab"),
        Err(AnalysisError::NotFound(Lookup::Tokenizer(_)))
    ));
}
