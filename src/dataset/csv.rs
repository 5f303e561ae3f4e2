//! Flat CSV interchange: one `label,x0,y0,...,x20,y20` row per sample.

use std::fmt::Write as _;

use super::document::{Dataset, DocumentError, normalize_label};
use crate::encoder::{LANDMARK_COUNT, SAMPLE_LEN, Sample};

/// Header row written on export and skipped on import.
pub fn header() -> String {
    let mut header = String::from("label");
    for i in 0..LANDMARK_COUNT {
        let _ = write!(header, ",x{i},y{i}");
    }
    header
}

/// Render every sample as a row, labels in dataset order.
pub fn to_csv(dataset: &Dataset) -> String {
    let mut out = header();
    out.push('\n');
    for entry in dataset.iter() {
        let label = quote_field(&entry.label);
        for sample in &entry.samples {
            out.push_str(&label);
            for value in sample {
                let _ = write!(out, ",{value}");
            }
            out.push('\n');
        }
    }
    out
}

/// Parse rows back into a dataset, grouping labels by first appearance.
pub fn from_csv(text: &str) -> Result<Dataset, DocumentError> {
    let mut dataset = Dataset::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let row = raw.trim_end_matches('\r');
        if row.trim().is_empty() {
            continue;
        }
        let (label, rest) = split_label(row).map_err(|message| DocumentError::Csv { line, message })?;
        let label = normalize_label(&label);
        if idx == 0 && label == "label" {
            continue;
        }
        if label.is_empty() {
            return Err(DocumentError::Csv {
                line,
                message: "empty label".to_string(),
            });
        }
        let sample = parse_values(rest).map_err(|message| DocumentError::Csv { line, message })?;
        dataset.entry(&label).push(sample);
    }
    dataset.validate()?;
    Ok(dataset)
}

fn parse_values(rest: &str) -> Result<Sample, String> {
    let sample = rest
        .split(',')
        .map(|cell| {
            let cell = cell.trim();
            cell.parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| format!("invalid coordinate {cell:?}"))
        })
        .collect::<Result<Sample, String>>()?;
    if sample.len() != SAMPLE_LEN {
        return Err(format!(
            "expected {SAMPLE_LEN} coordinates, found {}",
            sample.len()
        ));
    }
    Ok(sample)
}

fn quote_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Split the (optionally quoted) label cell from the coordinate cells.
fn split_label(row: &str) -> Result<(String, &str), String> {
    if let Some(quoted) = row.strip_prefix('"') {
        let mut label = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((pos, ch)) = chars.next() {
            if ch != '"' {
                label.push(ch);
                continue;
            }
            if let Some((_, '"')) = chars.peek() {
                chars.next();
                label.push('"');
                continue;
            }
            let rest = &quoted[pos + 1..];
            let rest = rest
                .strip_prefix(',')
                .ok_or_else(|| "expected ',' after quoted label".to_string())?;
            return Ok((label, rest));
        }
        return Err("unterminated quoted label".to_string());
    }
    let (label, rest) = row
        .split_once(',')
        .ok_or_else(|| "row has no coordinates".to_string())?;
    Ok((label.trim().to_string(), rest))
}
