//! # Matrix I/O and the Five-Matrix Dataset
//!
//! This module is the exclusive entry point for on-disk data. Matrices are
//! plain-text and whitespace-delimited, one row per individual, in the format
//! produced by the simulation pipeline upstream of this tool. Missing
//! allele-specific expression (a site of homozygosity) is encoded as a
//! non-finite `NaN` token, never as zero.
//!
//! The [`Dataset`] container bundles the five co-indexed matrices that
//! describe a cohort. Row `i` refers to the same individual in all five
//! matrices, and every operation in this crate preserves that alignment.

use ndarray::{Array2, ArrayView2, Axis};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A comprehensive error type for matrix loading, validation and persistence.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse '{token}' as a number ({path}, line {line})")]
    Parse {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("Ragged matrix in '{path}': line {line} has {found} columns, expected {expected}")]
    Ragged {
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("Matrix file '{path}' contains no rows")]
    Empty { path: PathBuf },
    #[error(
        "Co-indexed matrices disagree on shape: {name} is {found:?}, expected {expected:?} \
         from the total-expression matrix"
    )]
    ShapeMismatch {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
}

fn io_err(path: &Path, source: std::io::Error) -> DataError {
    DataError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads a whitespace-delimited plain-text matrix.
///
/// `NaN` tokens (any case) parse to `f64::NAN`; blank lines are skipped.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(file);

    let mut values: Vec<f64> = Vec::new();
    let mut ncols = 0usize;
    let mut nrows = 0usize;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let mut row_len = 0usize;
        for token in line.split_whitespace() {
            let value: f64 = token.parse().map_err(|_| DataError::Parse {
                path: path.to_path_buf(),
                line: lineno + 1,
                token: token.to_string(),
            })?;
            values.push(value);
            row_len += 1;
        }
        if nrows == 0 {
            ncols = row_len;
        } else if row_len != ncols {
            return Err(DataError::Ragged {
                path: path.to_path_buf(),
                line: lineno + 1,
                expected: ncols,
                found: row_len,
            });
        }
        nrows += 1;
    }

    if nrows == 0 {
        return Err(DataError::Empty {
            path: path.to_path_buf(),
        });
    }

    Ok(Array2::from_shape_vec((nrows, ncols), values)
        .expect("row-major value buffer matches counted shape"))
}

/// Writes a matrix as whitespace-delimited plain text, one row per line.
///
/// `f64`'s shortest round-trip formatting is used, so a written matrix reads
/// back bit-identically; non-finite entries serialize as `NaN`/`inf` tokens.
pub fn write_matrix(path: &Path, matrix: ArrayView2<f64>) -> Result<(), DataError> {
    let file = File::create(path).map_err(|e| io_err(path, e))?;
    let mut writer = BufWriter::new(file);
    for row in matrix.rows() {
        let mut first = true;
        for value in row.iter() {
            if !first {
                write!(writer, " ").map_err(|e| io_err(path, e))?;
            }
            write!(writer, "{value}").map_err(|e| io_err(path, e))?;
            first = false;
        }
        writeln!(writer).map_err(|e| io_err(path, e))?;
    }
    writer.flush().map_err(|e| io_err(path, e))
}

/// The five co-indexed matrices describing a cohort.
///
/// Row `i` is the same individual everywhere. Expression matrices are
/// N×q (individuals × genes); genotype matrices are N×p (individuals ×
/// genotype features).
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Total (summed) gene expression, N×q.
    pub ysum: Array2<f64>,
    /// Maternal gene expression, N×q. `NaN` marks sites of homozygosity.
    pub ym: Array2<f64>,
    /// Paternal gene expression, N×q. `NaN` marks sites of homozygosity.
    pub yp: Array2<f64>,
    /// Maternal genotype features, N×p.
    pub xm: Array2<f64>,
    /// Paternal genotype features, N×p.
    pub xp: Array2<f64>,
}

impl Dataset {
    /// Bundles five matrices after validating their shapes against each other.
    pub fn new(
        ysum: Array2<f64>,
        ym: Array2<f64>,
        yp: Array2<f64>,
        xm: Array2<f64>,
        xp: Array2<f64>,
    ) -> Result<Self, DataError> {
        let n = ysum.nrows();
        let q = ysum.ncols();
        let p = xm.ncols();
        let check = |name: &'static str, found: (usize, usize), expected: (usize, usize)| {
            if found == expected {
                Ok(())
            } else {
                Err(DataError::ShapeMismatch {
                    name,
                    expected,
                    found,
                })
            }
        };
        check("Ym", ym.dim(), (n, q))?;
        check("Yp", yp.dim(), (n, q))?;
        check("Xm", xm.dim(), (n, p))?;
        check("Xp", xp.dim(), (n, p))?;
        Ok(Self {
            ysum,
            ym,
            yp,
            xm,
            xp,
        })
    }

    /// Loads a dataset from five matrix files.
    pub fn load(
        ysum: &Path,
        ym: &Path,
        yp: &Path,
        xm: &Path,
        xp: &Path,
    ) -> Result<Self, DataError> {
        Self::new(
            read_matrix(ysum)?,
            read_matrix(ym)?,
            read_matrix(yp)?,
            read_matrix(xm)?,
            read_matrix(xp)?,
        )
    }

    pub fn n_individuals(&self) -> usize {
        self.ysum.nrows()
    }

    pub fn n_genes(&self) -> usize {
        self.ysum.ncols()
    }

    pub fn n_markers(&self) -> usize {
        self.xm.ncols()
    }

    /// Returns a new dataset holding the given rows, in the given order.
    ///
    /// All five matrices are subset together so row alignment is preserved by
    /// construction.
    pub fn select_rows(&self, rows: &[usize]) -> Dataset {
        Dataset {
            ysum: self.ysum.select(Axis(0), rows),
            ym: self.ym.select(Axis(0), rows),
            yp: self.yp.select(Axis(0), rows),
            xm: self.xm.select(Axis(0), rows),
            xp: self.xp.select(Axis(0), rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn write_fixture(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        write!(file, "{content}").expect("write fixture");
        file.flush().expect("flush fixture");
        file
    }

    #[test]
    fn read_matrix_parses_nan_sentinels() {
        let file = write_fixture("1.0 NaN 3.5\n-2 0 nan\n");
        let m = read_matrix(file.path()).unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert!(m[[0, 1]].is_nan());
        assert!(m[[1, 2]].is_nan());
        assert_eq!(m[[1, 0]], -2.0);
    }

    #[test]
    fn read_matrix_rejects_ragged_rows() {
        let file = write_fixture("1 2 3\n4 5\n");
        match read_matrix(file.path()) {
            Err(DataError::Ragged {
                line,
                expected,
                found,
                ..
            }) => {
                assert_eq!((line, expected, found), (2, 3, 2));
            }
            other => panic!("expected Ragged error, got {other:?}"),
        }
    }

    #[test]
    fn read_matrix_rejects_bad_token() {
        let file = write_fixture("1 2\n3 oops\n");
        match read_matrix(file.path()) {
            Err(DataError::Parse { line, token, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(token, "oops");
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn write_then_read_round_trips_including_nan() {
        let m = array![[0.1, f64::NAN], [1e-300, -4.25]];
        let file = NamedTempFile::new().unwrap();
        write_matrix(file.path(), m.view()).unwrap();
        let back = read_matrix(file.path()).unwrap();
        assert_eq!(back.dim(), m.dim());
        assert!(back[[0, 1]].is_nan());
        assert_eq!(back[[0, 0]], 0.1);
        assert_eq!(back[[1, 0]], 1e-300);
        assert_eq!(back[[1, 1]], -4.25);
    }

    #[test]
    fn dataset_new_rejects_misaligned_rows() {
        let err = Dataset::new(
            Array2::zeros((3, 2)),
            Array2::zeros((2, 2)),
            Array2::zeros((3, 2)),
            Array2::zeros((3, 4)),
            Array2::zeros((3, 4)),
        )
        .unwrap_err();
        match err {
            DataError::ShapeMismatch { name, .. } => assert_eq!(name, "Ym"),
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn select_rows_keeps_all_five_matrices_aligned() {
        let base = Dataset::new(
            array![[1.0], [2.0], [3.0]],
            array![[10.0], [20.0], [30.0]],
            array![[11.0], [21.0], [31.0]],
            array![[0.0, 1.0], [1.0, 1.0], [2.0, 0.0]],
            array![[0.0, 0.0], [1.0, 0.0], [0.0, 2.0]],
        )
        .unwrap();
        let picked = base.select_rows(&[2, 0]);
        assert_eq!(picked.ysum, array![[3.0], [1.0]]);
        assert_eq!(picked.ym, array![[30.0], [10.0]]);
        assert_eq!(picked.yp, array![[31.0], [11.0]]);
        assert_eq!(picked.xm, array![[2.0, 0.0], [0.0, 1.0]]);
        assert_eq!(picked.xp, array![[0.0, 2.0], [0.0, 0.0]]);
    }
}
