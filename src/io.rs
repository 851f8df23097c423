//! Matrix files for the command line: one row per pitch, one column per timestep.
//!
//! `.json` files hold an array of rows. Anything else is read as comma-separated text, where blank
//! lines and lines starting with `#` are skipped.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ndarray::Array2;

pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let rows = if is_json(path) {
        serde_json::from_str::<Vec<Vec<f64>>>(&text)
            .with_context(|| format!("parsing JSON matrix {}", path.display()))?
    } else {
        parse_csv(&text).with_context(|| format!("parsing CSV matrix {}", path.display()))?
    };
    to_array(rows).with_context(|| format!("shaping matrix {}", path.display()))
}

/// Reads a ground-truth roll; any value above 0.5 counts as active.
pub fn read_roll(path: &Path) -> Result<Array2<bool>> {
    Ok(read_matrix(path)?.mapv(|v| v > 0.5))
}

pub fn write_roll(path: &Path, roll: &Array2<bool>) -> Result<()> {
    write_rows(path, roll.rows().into_iter().map(|row| {
        row.iter()
            .map(|&on| String::from(if on { "1" } else { "0" }))
            .collect::<Vec<_>>()
    }))
}

pub fn write_matrix(path: &Path, matrix: &Array2<f64>) -> Result<()> {
    write_rows(
        path,
        matrix
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect::<Vec<_>>()),
    )
}

fn write_rows(path: &Path, rows: impl Iterator<Item = Vec<String>>) -> Result<()> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn parse_csv(text: &str) -> Result<Vec<Vec<f64>>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(number, line)| {
            line.split(',')
                .map(|cell| {
                    let cell = cell.trim();
                    cell.parse::<f64>()
                        .with_context(|| format!("line {}: invalid number '{cell}'", number + 1))
                })
                .collect()
        })
        .collect()
}

fn to_array(rows: Vec<Vec<f64>>) -> Result<Array2<f64>> {
    let Some(width) = rows.first().map(Vec::len) else {
        bail!("matrix has no rows");
    };
    if let Some(row) = rows.iter().position(|r| r.len() != width) {
        bail!(
            "row {row} has {} columns, expected {width}",
            rows[row].len()
        );
    }
    let height = rows.len();
    let data: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((height, width), data)?)
}
