//! grounding-score – coordinate extraction from raw model text and
//! correctness grading against the ground-truth box.
//!
//! The model is instructed to answer in a fixed 0–1000 virtual coordinate
//! space regardless of actual image resolution. Extraction deliberately
//! ignores the surrounding answer tags: the first bracketed integer pair
//! anywhere in the text wins, and malformed structure around it is tolerated.

use grounding_dataset::Correctness;
use once_cell::sync::Lazy;
use regex::Regex;

/// The virtual coordinate scale the model reports in.
pub const VIRTUAL_SCALE: f64 = 1000.0;

static COORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+),(\d+)\]").unwrap());

/// Extract the first `[x,y]` integer pair from `raw`.
///
/// Returns the sentinel `(-1, -1)` when no pair is present, which grades as
/// `wrong_format`. Only non-negative integers with no interior whitespace
/// match; later pairs in the same response are ignored.
pub fn parse_coordinates(raw: &str) -> (i64, i64) {
    for caps in COORD_PATTERN.captures_iter(raw) {
        if let (Ok(x), Ok(y)) = (caps[1].parse::<i64>(), caps[2].parse::<i64>()) {
            return (x, y);
        }
    }
    (-1, -1)
}

/// Outcome of grading one parsed prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Grade {
    /// Predicted point in absolute source-image pixels.
    pub pred: Option<[f64; 2]>,
    /// Predicted point in [0,1]².
    pub pred_norm: Option<[f64; 2]>,
    pub correctness: Correctness,
}

/// Grade a parsed coordinate pair against the ground-truth box.
///
/// `ori_width`/`ori_height` are the dimensions of the image as decoded from
/// disk, not of the resized transmission copy. The box denominator is
/// `img_size` when it has exactly two entries, otherwise the decoded
/// dimensions. Containment is inclusive on all four boundaries.
pub fn grade(
    parsed: (i64, i64),
    bbox: &[f64; 4],
    img_size: Option<&[f64]>,
    ori_width: u32,
    ori_height: u32,
) -> Grade {
    let (x, y) = parsed;
    if x == -1 || y == -1 {
        return Grade {
            pred: None,
            pred_norm: None,
            correctness: Correctness::WrongFormat,
        };
    }

    let norm = [x as f64 / VIRTUAL_SCALE, y as f64 / VIRTUAL_SCALE];
    let pred = [norm[0] * ori_width as f64, norm[1] * ori_height as f64];

    let (img_width, img_height) = match img_size {
        Some(size) if size.len() == 2 => (size[0], size[1]),
        _ => (ori_width as f64, ori_height as f64),
    };
    let bbox_norm = [
        bbox[0] / img_width,
        bbox[1] / img_height,
        bbox[2] / img_width,
        bbox[3] / img_height,
    ];

    let inside = bbox_norm[0] <= norm[0]
        && norm[0] <= bbox_norm[2]
        && bbox_norm[1] <= norm[1]
        && norm[1] <= bbox_norm[3];

    Grade {
        pred: Some(pred),
        pred_norm: Some(norm),
        correctness: if inside {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        },
    }
}
