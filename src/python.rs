use std::collections::HashMap;

use pyo3::{
    exceptions::{PyIOError, PyKeyError, PyValueError},
    prelude::*,
};
use serde::Serialize;

use crate::{
    analyzer::{Analyzer, AnalyzerConfig},
    error::{AnalysisError, LoadError},
    loader::load_hf_file,
    query::{paginate, ForestQuery},
    source::StaticTokenizer,
    types::{Rank, RankTable, Symbol},
    undertrained::DetectorConfig,
};

fn analysis_err(e: AnalysisError) -> PyErr {
    match e {
        AnalysisError::NotFound(_) => PyKeyError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn load_err(e: LoadError) -> PyErr {
    PyIOError::new_err(e.to_string())
}

fn to_json<T: Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyValueError::new_err(e.to_string()))
}

/// Python handle to a tokenizer registry. Every query returns a JSON string.
#[pyclass(name = "MergeLens", module = "mergelens")]
pub struct PyMergeLens {
    inner: Analyzer,
}

#[pymethods]
impl PyMergeLens {
    #[new]
    #[pyo3(signature = (show_progress=false, special_token_pattern=None))]
    fn new(show_progress: bool, special_token_pattern: Option<String>) -> Self {
        let mut detector = DetectorConfig {
            show_progress,
            ..DetectorConfig::default()
        };
        if let Some(pattern) = special_token_pattern {
            detector.special_token_pattern = pattern;
        }
        Self {
            inner: Analyzer::new(AnalyzerConfig {
                detector,
                show_progress,
            }),
        }
    }

    /// Registered tokenizer ids.
    fn ids(&self) -> Vec<String> {
        self.inner.ids()
    }

    /// Load a HuggingFace `tokenizer.json` under `id`.
    fn load_hf(&self, id: &str, path: &str) -> PyResult<()> {
        let tokenizer = load_hf_file(id, path).map_err(load_err)?;
        self.inner.register(id, tokenizer);
        Ok(())
    }

    /// Register a raw `{bytes: rank}` table (tiktoken style) under `id`.
    fn load_ranks(&self, id: &str, ranks: HashMap<Symbol, Rank>) {
        let table: RankTable = ranks.into_iter().collect();
        self.inner.register(id, StaticTokenizer::from_ranks(id, table));
    }

    fn unload(&self, id: &str) -> bool {
        self.inner.unregister(id)
    }

    #[pyo3(signature = (id, filter="all", search="", sort_by="rank", descending=false, page=1, page_size=100))]
    #[allow(clippy::too_many_arguments)]
    fn forest(
        &self,
        py: Python<'_>,
        id: &str,
        filter: &str,
        search: &str,
        sort_by: &str,
        descending: bool,
        page: usize,
        page_size: usize,
    ) -> PyResult<String> {
        let query = ForestQuery {
            filter: filter.parse().map_err(analysis_err)?,
            search: search.to_string(),
            sort_by: sort_by.parse().map_err(analysis_err)?,
            descending,
            page,
            page_size,
        };
        let forest = py.allow_threads(|| self.inner.forest(id)).map_err(analysis_err)?;
        to_json(&query.apply(&forest))
    }

    fn subtree(&self, id: &str, rank: Rank) -> PyResult<String> {
        to_json(&self.inner.subtree(id, rank).map_err(analysis_err)?)
    }

    fn simulate(&self, id: &str, text: &str) -> PyResult<String> {
        to_json(&self.inner.simulate(id, text).map_err(analysis_err)?)
    }

    fn compare(&self, text: &str, id_a: &str, id_b: &str) -> PyResult<String> {
        to_json(&self.inner.compare(text, id_a, id_b).map_err(analysis_err)?)
    }

    #[pyo3(signature = (id, page=1, page_size=100))]
    fn undertrained(&self, py: Python<'_>, id: &str, page: usize, page_size: usize) -> PyResult<String> {
        let findings = py
            .allow_threads(|| self.inner.undertrained(id))
            .map_err(analysis_err)?;
        to_json(&paginate(findings.iter(), page, page_size))
    }
}
