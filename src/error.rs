//! Error types for merge-structure analysis and tokenizer loading.

use std::fmt;

use indicatif::style::TemplateError;

use crate::types::Rank;

/// Data a tokenizer must expose for an analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Symbol -> rank table (merge forest, merge tree simulation).
    MergeRanks,
    /// Ordered merge-rule list (undertrained detection).
    MergeRules,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergeRanks => f.write_str("BPE merge ranks"),
            Self::MergeRules => f.write_str("ordered BPE merge rules"),
        }
    }
}

/// What a failed lookup was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// No tokenizer registered under this id.
    Tokenizer(String),
    /// No symbol holds this rank.
    Rank(Rank),
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tokenizer(id) => write!(f, "tokenizer {id:?} not loaded"),
            Self::Rank(rank) => write!(f, "no token found with rank {rank}"),
        }
    }
}

/// Errors that can occur while analysing a tokenizer.
#[derive(Debug)]
pub enum AnalysisError {
    /// The tokenizer does not expose the data this analysis needs.
    UnsupportedTokenizer {
        tokenizer: String,
        missing: Capability,
    },
    /// A symbol was empty where a non-empty one was required.
    InvalidInput(String),
    /// A requested tokenizer or rank does not exist.
    NotFound(Lookup),
    /// The special-marker pattern failed to compile.
    InvalidPattern(fancy_regex::Error),
    /// Progress bar template string was invalid.
    ProgressBarSetup(TemplateError),
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedTokenizer { tokenizer, missing } => {
                write!(f, "tokenizer {tokenizer:?} does not expose {missing}")
            }
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::NotFound(what) => write!(f, "{what}"),
            Self::InvalidPattern(e) => write!(f, "invalid special token pattern: {e}"),
            Self::ProgressBarSetup(e) => write!(f, "template parsing failed: {e}"),
        }
    }
}

impl std::error::Error for AnalysisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidPattern(e) => Some(e),
            _ => None,
        }
    }
}

impl From<fancy_regex::Error> for AnalysisError {
    fn from(e: fancy_regex::Error) -> Self {
        Self::InvalidPattern(e)
    }
}

impl From<TemplateError> for AnalysisError {
    fn from(e: TemplateError) -> Self {
        Self::ProgressBarSetup(e)
    }
}

/// Errors that can occur when loading a tokenizer definition.
#[derive(Debug)]
pub enum LoadError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file is not valid tokenizer JSON.
    Json(serde_json::Error),
    /// The model section has a shape this loader does not understand.
    UnsupportedModel(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read tokenizer file: {e}"),
            Self::Json(e) => write!(f, "failed to parse tokenizer JSON: {e}"),
            Self::UnsupportedModel(msg) => write!(f, "unsupported tokenizer model: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::UnsupportedModel(_) => None,
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_capability() {
        let err = AnalysisError::UnsupportedTokenizer {
            tokenizer: "bert".to_string(),
            missing: Capability::MergeRules,
        };
        assert_eq!(
            err.to_string(),
            "tokenizer \"bert\" does not expose ordered BPE merge rules"
        );
    }

    #[test]
    fn test_not_found_messages() {
        assert_eq!(
            AnalysisError::NotFound(Lookup::Rank(42)).to_string(),
            "no token found with rank 42"
        );
        assert_eq!(
            AnalysisError::NotFound(Lookup::Tokenizer("gpt2".into())).to_string(),
            "tokenizer \"gpt2\" not loaded"
        );
    }

    #[test]
    fn test_invalid_pattern_converts() {
        let err: AnalysisError = match fancy_regex::Regex::new("(") {
            Ok(_) => panic!("pattern should not compile"),
            Err(e) => e.into(),
        };
        assert!(matches!(err, AnalysisError::InvalidPattern(_)));
    }
}
