//! grounding-dataset – labeled grounding cases and the result rows the
//! evaluation writes for them.
//!
//! A dataset directory holds one or more JSON files, each an ordered list of
//! case objects. Every case is tagged at load time with the name of the file
//! it came from; that tag is the bucket key for accuracy aggregation and is
//! never mutated afterwards.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset directory not found: {0}")]
    DirMissing(String),
    #[error("no JSON dataset files found in {0}")]
    NoDatasets(String),
    #[error("invalid dataset glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One labeled grounding case.
///
/// `bbox` is `[x1, y1, x2, y2]` in source-image pixels with `x1 <= x2` and
/// `y1 <= y2`. `img_size` is the `[w, h]` the box was annotated against; when
/// absent (or not exactly two entries) the decoded image's own dimensions are
/// used instead. Fields beyond the known ones are kept verbatim in `extra` so
/// result rows carry everything the dataset supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub img_filename: String,
    pub instruction: String,
    pub bbox: [f64; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_size: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_source: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Classification of one prediction against its ground-truth box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correctness {
    Correct,
    Incorrect,
    WrongFormat,
}

/// One output row: the full case plus everything the model produced.
///
/// `pred` is the predicted point in absolute source-image pixels, `pred_norm`
/// the same point in [0,1]². Both are `null` exactly when the response could
/// not be parsed (`correctness = wrong_format`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    #[serde(flatten)]
    pub case: Case,
    pub raw_response: String,
    pub pred: Option<[f64; 2]>,
    pub pred_norm: Option<[f64; 2]>,
    pub correctness: Correctness,
}

/// List the `*.json` dataset files in `dir`, sorted by name.
///
/// A missing directory or an empty listing is a startup error; the run must
/// not dispatch any work in either case.
pub fn dataset_files(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if !dir.is_dir() {
        return Err(DatasetError::DirMissing(dir.display().to_string()));
    }
    let pattern = dir.join("*.json");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
        .filter_map(Result::ok)
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(DatasetError::NoDatasets(dir.display().to_string()));
    }
    Ok(files)
}

/// Load one dataset file and tag every case with the file's name.
pub fn load_file(path: &Path) -> Result<Vec<Case>, DatasetError> {
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let text = std::fs::read_to_string(path).map_err(|source_err| DatasetError::Io {
        path: path.display().to_string(),
        source: source_err,
    })?;
    let mut cases: Vec<Case> = serde_json::from_str(&text).map_err(|source_err| DatasetError::Parse {
        path: path.display().to_string(),
        source: source_err,
    })?;
    for case in &mut cases {
        case.dataset_source = Some(source.clone());
    }
    Ok(cases)
}
