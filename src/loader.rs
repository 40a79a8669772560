//! Loading tokenizer definitions from disk.
//!
//! Supports HuggingFace `tokenizer.json` files. Byte-level BPE models store
//! every byte as a printable character (GPT-2's byte alphabet, e.g. a space
//! is `Ġ`); other models spell tokens as plain text. The choice is made once
//! per file, see [`TokenEncoding`].

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::OnceLock,
};

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::LoadError,
    source::StaticTokenizer,
    types::{MergeRule, RankTable, Symbol, TokenId, Vocab},
};

/// Bytes GPT-2 keeps as their own Latin-1 character.
fn is_direct_byte(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xa1..=0xac | 0xae..=0xff)
}

/// Character -> byte table of GPT-2's byte-level alphabet.
fn gpt2_byte_decoder() -> &'static HashMap<char, u8> {
    static DECODER: OnceLock<HashMap<char, u8>> = OnceLock::new();

    DECODER.get_or_init(|| {
        let mut decoder = HashMap::with_capacity(256);
        let mut n = 0u32;
        for b in 0u8..=255 {
            if is_direct_byte(b) {
                decoder.insert(char::from(b), b);
            } else {
                if let Some(c) = char::from_u32(256 + n) {
                    decoder.insert(c, b);
                }
                n += 1;
            }
        }
        decoder
    })
}

/// How a tokenizer spells raw bytes in its vocabulary and merge strings.
///
/// One encoding applies to a whole tokenizer, so a vocabulary entry and the
/// merge halves that build it always decode to matching bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    /// GPT-2 byte alphabet: every byte is one printable character (`Ġ` is a space).
    ByteLevel,
    /// Strings are plain text; their bytes are the UTF-8 encoding.
    Utf8,
}

impl TokenEncoding {
    /// Raw bytes of a vocabulary or merge string.
    ///
    /// Under [`ByteLevel`](Self::ByteLevel) a character outside the byte
    /// alphabet keeps its UTF-8 bytes.
    pub fn decode(self, token: &str) -> Symbol {
        match self {
            Self::Utf8 => token.as_bytes().to_vec(),
            Self::ByteLevel => {
                let decoder = gpt2_byte_decoder();
                let mut bytes = Vec::with_capacity(token.len());
                for c in token.chars() {
                    match decoder.get(&c) {
                        Some(&b) => bytes.push(b),
                        None => bytes.extend_from_slice(c.encode_utf8(&mut [0u8; 4]).as_bytes()),
                    }
                }
                bytes
            }
        }
    }

    /// Picks the encoding of a `tokenizer.json`.
    ///
    /// # Arguments
    ///
    /// * `components` - The file's `pre_tokenizer` and `decoder` sections.
    /// * `tokens` - Vocabulary strings, consulted only when no component is present.
    ///
    /// # Returns
    ///
    /// [`ByteLevel`](Self::ByteLevel) if any component (including members of a
    /// `Sequence`) is a `ByteLevel` step. Files without either section are
    /// byte-level when every non-special token is spelled in the byte
    /// alphabet. Everything else is [`Utf8`](Self::Utf8).
    fn detect<'a>(components: &[Option<&Value>], tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let present: Vec<&Value> = components.iter().flatten().copied().collect();
        if present.iter().any(|v| mentions_byte_level(v)) {
            return Self::ByteLevel;
        }
        if !present.is_empty() {
            return Self::Utf8;
        }

        let decoder = gpt2_byte_decoder();
        let all_in_alphabet = tokens
            .into_iter()
            .filter(|t| !is_marker(t))
            .all(|t| t.chars().all(|c| decoder.contains_key(&c)));
        if all_in_alphabet {
            Self::ByteLevel
        } else {
            Self::Utf8
        }
    }
}

fn mentions_byte_level(component: &Value) -> bool {
    match component {
        Value::Object(fields) => {
            fields.get("type").and_then(Value::as_str) == Some("ByteLevel")
                || fields.values().any(mentions_byte_level)
        }
        Value::Array(items) => items.iter().any(mentions_byte_level),
        _ => false,
    }
}

/// Reserved markers such as `<unk>` or `<|endoftext|>`.
fn is_marker(token: &str) -> bool {
    token.starts_with('<') && token.ends_with('>')
}

#[derive(Debug, Deserialize)]
struct HfTokenizerJson {
    model: HfModel,
    #[serde(default)]
    added_tokens: Vec<HfAddedToken>,
    #[serde(default)]
    pre_tokenizer: Option<Value>,
    #[serde(default)]
    decoder: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HfModel {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    vocab: HfVocab,
    #[serde(default)]
    merges: Vec<HfMerge>,
}

/// `{"token": id}` for BPE / WordPiece, `[["piece", score], ...]` for Unigram.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfVocab {
    Map(HashMap<String, TokenId>),
    Scored(Vec<(String, f64)>),
}

impl Default for HfVocab {
    fn default() -> Self {
        Self::Map(HashMap::new())
    }
}

/// Older files join a merge as `"left right"`, newer ones store a pair.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HfMerge {
    Joined(String),
    Pair(String, String),
}

impl HfMerge {
    fn halves(&self) -> Option<(&str, &str)> {
        match self {
            Self::Joined(s) => s.split_once(' '),
            Self::Pair(l, r) => Some((l.as_str(), r.as_str())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HfAddedToken {
    id: TokenId,
    content: String,
}

/// Loads a HuggingFace `tokenizer.json` from `path`.
///
/// # Errors
///
/// Returns [`LoadError::Io`] if the file cannot be read, otherwise see
/// [`load_hf_json`].
pub fn load_hf_file(name: &str, path: impl AsRef<Path>) -> Result<StaticTokenizer, LoadError> {
    let text = fs::read_to_string(path.as_ref())?;
    load_hf_json(name, &text)
}

/// Parses the contents of a HuggingFace `tokenizer.json`.
///
/// # Arguments
///
/// * `name` - Label used in log lines and as the tokenizer's name.
/// * `json` - The file contents.
///
/// # Returns
///
/// For BPE models, a tokenizer with a rank table (vocabulary id as rank,
/// `<...>` markers excluded) and the merge list, all decoded with the one
/// [`TokenEncoding`] the file uses. WordPiece, WordLevel and Unigram models
/// load with their vocabulary only.
///
/// # Errors
///
/// Returns [`LoadError::Json`] for malformed JSON and
/// [`LoadError::UnsupportedModel`] for an unknown model type or a BPE model
/// without a token -> id vocabulary.
pub fn load_hf_json(name: &str, json: &str) -> Result<StaticTokenizer, LoadError> {
    let file: HfTokenizerJson = serde_json::from_str(json)?;
    let HfModel { kind, vocab, merges } = file.model;

    // files written before the "type" tag existed are BPE whenever they list merges
    let is_bpe = match kind.as_deref() {
        Some("BPE") => true,
        Some("WordPiece" | "WordLevel" | "Unigram") => false,
        Some(other) => return Err(LoadError::UnsupportedModel(other.to_string())),
        None => !merges.is_empty(),
    };

    let mut entries: Vec<(String, TokenId)> = match vocab {
        HfVocab::Map(map) => map.into_iter().collect(),
        HfVocab::Scored(_) if is_bpe => {
            return Err(LoadError::UnsupportedModel(
                "BPE model with a scored vocabulary".to_string(),
            ))
        }
        HfVocab::Scored(pieces) => pieces
            .into_iter()
            .enumerate()
            .map(|(id, (piece, _))| (piece, id as TokenId))
            .collect(),
    };

    let known: HashSet<TokenId> = entries.iter().map(|(_, id)| *id).collect();
    entries.extend(
        file.added_tokens
            .into_iter()
            .filter(|t| !known.contains(&t.id))
            .map(|t| (t.content, t.id)),
    );

    if !is_bpe {
        info!("{name}: loaded {} vocabulary entries (no merge data)", entries.len());
        let vocab = Vocab::from_strings(entries);
        return Ok(StaticTokenizer::new(name, vocab, None, None));
    }

    let encoding = TokenEncoding::detect(
        &[file.pre_tokenizer.as_ref(), file.decoder.as_ref()],
        entries.iter().map(|(token, _)| token.as_str()),
    );
    debug!("{name}: vocabulary strings decoded as {encoding:?}");

    let ranks: RankTable = entries
        .iter()
        .filter(|(token, _)| !is_marker(token))
        .map(|(token, id)| (encoding.decode(token), *id))
        .collect();

    let mut rules = Vec::with_capacity(merges.len());
    for merge in &merges {
        match merge.halves() {
            Some((left, right)) => rules.push(MergeRule::new(encoding.decode(left), encoding.decode(right))),
            None => warn!("{name}: skipping malformed merge {merge:?}"),
        }
    }

    let vocab = Vocab::new(entries.iter().map(|(token, id)| (encoding.decode(token), *id)));

    info!(
        "{name}: loaded BPE tokenizer with {} vocabulary entries, {} ranks, {} merges",
        vocab.len(),
        ranks.len(),
        rules.len()
    );
    Ok(StaticTokenizer::new(name, vocab, Some(ranks), Some(rules)))
}
