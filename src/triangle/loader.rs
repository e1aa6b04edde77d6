//! Load triangles and weight matrices from CSV files
//!
//! Cells may be empty (or "NA"/"NaN") for unobserved entries; rows shorter
//! than the longest row are padded. Numbers are plain decimals, no headers.

use std::path::Path;

use csv::ReaderBuilder;

use crate::error::Result;
use crate::triangle::Triangle;

fn parse_cell(field: &str) -> f64 {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
    {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

fn load_matrix(path: &Path) -> Result<Vec<Vec<f64>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(parse_cell).collect());
    }
    Ok(rows)
}

/// Load a claim triangle; missing cells become the NaN sentinel.
pub fn load_triangle_csv<P: AsRef<Path>>(path: P) -> Result<Triangle> {
    Triangle::from_ragged_rows(load_matrix(path.as_ref())?)
}

/// Load a weight matrix; missing cells become zero weight (excluded).
pub fn load_weights_csv<P: AsRef<Path>>(path: P) -> Result<Triangle> {
    let rows = load_matrix(path.as_ref())?;
    let tri = Triangle::from_ragged_rows(rows)?;
    let mut out = tri.clone();
    for i in 0..tri.rows() {
        for j in 0..tri.cols() {
            if tri.get(i, j).is_nan() {
                out.set(i, j, 0.0);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_triangle_with_missing_cells() {
        let path = write_temp(
            "reserving_engine_tri_test.csv",
            "100,150,175\n110,160,\n120,,\n",
        );
        let tri = load_triangle_csv(&path).unwrap();
        assert_eq!(tri.rows(), 3);
        assert_eq!(tri.cols(), 3);
        assert_eq!(tri.get(0, 2), 175.0);
        assert!(!tri.is_observed(1, 2));
        assert!(!tri.is_observed(2, 1));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_weights_missing_cells_are_zero() {
        let path = write_temp("reserving_engine_w_test.csv", "1,1,0\n1,1\n1\n");
        let w = load_weights_csv(&path).unwrap();
        assert_eq!(w.get(0, 2), 0.0);
        assert_eq!(w.get(1, 2), 0.0);
        assert_eq!(w.get(2, 2), 0.0);
        assert_eq!(w.get(1, 1), 1.0);
        std::fs::remove_file(path).ok();
    }
}
