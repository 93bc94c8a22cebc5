//! Block access to expression matrices
//!
//! The engine never assumes the whole matrix is in memory: every pass
//! reads contiguous row blocks (observations) or a column subset
//! (features). Dense and CSR matrices implement the trait here; an
//! out-of-core container only has to provide `read_rows`.

use crate::common::*;
use matrix_util::utils::generate_minibatch_intervals;
use rayon::prelude::*;

pub trait ExprSource: Sync {
    /// Number of observations
    fn nrows(&self) -> usize;

    /// Number of features
    fn ncols(&self) -> usize;

    /// Dense block of rows `lb..ub`, all features
    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat>;

    /// Dense block of rows `lb..ub` restricted to `cols`
    fn read_rows_columns(&self, lb: usize, ub: usize, cols: &[usize]) -> anyhow::Result<Mat> {
        Ok(self.read_rows(lb, ub)?.select_columns(cols.iter()))
    }

    /// All rows restricted to `cols`, assembled block by block
    fn read_columns(&self, cols: &[usize], block_size: usize) -> anyhow::Result<Mat> {
        check_columns(self.ncols(), cols)?;
        let blocks = generate_minibatch_intervals(self.nrows(), block_size)
            .into_par_iter()
            .map(|(lb, ub)| self.read_rows_columns(lb, ub, cols))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(stack_rows(&blocks, cols.len()))
    }

    /// Arbitrary rows in the given order
    fn read_row_subset(&self, rows: &[usize]) -> anyhow::Result<Mat> {
        check_rows(self.nrows(), rows)?;
        let mut ret = Mat::zeros(rows.len(), self.ncols());
        for (r, &i) in rows.iter().enumerate() {
            ret.row_mut(r).copy_from(&self.read_rows(i, i + 1)?.row(0));
        }
        Ok(ret)
    }

    /// Row blocks `(lb, ub)` covering every observation
    fn row_blocks(&self, block_size: usize) -> Vec<(usize, usize)> {
        generate_minibatch_intervals(self.nrows(), block_size)
    }
}

impl<S: ExprSource + ?Sized> ExprSource for &S {
    fn nrows(&self) -> usize {
        (**self).nrows()
    }
    fn ncols(&self) -> usize {
        (**self).ncols()
    }
    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat> {
        (**self).read_rows(lb, ub)
    }
    fn read_rows_columns(&self, lb: usize, ub: usize, cols: &[usize]) -> anyhow::Result<Mat> {
        (**self).read_rows_columns(lb, ub, cols)
    }
    fn read_row_subset(&self, rows: &[usize]) -> anyhow::Result<Mat> {
        (**self).read_row_subset(rows)
    }
}

impl ExprSource for Mat {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat> {
        check_range(self.nrows(), lb, ub)?;
        Ok(self.rows(lb, ub - lb).into_owned())
    }

    fn read_rows_columns(&self, lb: usize, ub: usize, cols: &[usize]) -> anyhow::Result<Mat> {
        check_range(self.nrows(), lb, ub)?;
        check_columns(self.ncols(), cols)?;
        Ok(self.rows(lb, ub - lb).select_columns(cols.iter()))
    }

    fn read_row_subset(&self, rows: &[usize]) -> anyhow::Result<Mat> {
        check_rows(self.nrows(), rows)?;
        Ok(self.select_rows(rows.iter()))
    }
}

impl ExprSource for CsrMat {
    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat> {
        check_range(self.nrows(), lb, ub)?;
        let mut ret = Mat::zeros(ub - lb, self.ncols());
        for i in lb..ub {
            let row = self.row(i);
            for (&j, &x) in row.col_indices().iter().zip(row.values()) {
                ret[(i - lb, j)] = x;
            }
        }
        Ok(ret)
    }
}

/// Concatenate row blocks vertically
pub fn stack_rows(blocks: &[Mat], ncols: usize) -> Mat {
    let nrows = blocks.iter().map(|b| b.nrows()).sum();
    let mut ret = Mat::zeros(nrows, ncols);
    let mut lb = 0;
    for b in blocks {
        ret.rows_mut(lb, b.nrows()).copy_from(b);
        lb += b.nrows();
    }
    ret
}

fn check_range(nrows: usize, lb: usize, ub: usize) -> anyhow::Result<()> {
    if lb > ub || ub > nrows {
        return Err(RuvError::Shape(format!("row block {}..{} out of {} rows", lb, ub, nrows)).into());
    }
    Ok(())
}

pub(crate) fn check_rows(nrows: usize, rows: &[usize]) -> anyhow::Result<()> {
    if let Some(&i) = rows.iter().find(|&&i| i >= nrows) {
        return Err(RuvError::Shape(format!("row {} out of {} rows", i, nrows)).into());
    }
    Ok(())
}

pub(crate) fn check_columns(ncols: usize, cols: &[usize]) -> anyhow::Result<()> {
    if let Some(&j) = cols.iter().find(|&&j| j >= ncols) {
        return Err(RuvError::Shape(format!("column {} out of {} columns", j, ncols)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::traits::SampleOps;
    use nalgebra_sparse::CooMatrix;

    #[test]
    fn dense_blocks_match_matrix() -> anyhow::Result<()> {
        let yy = Mat::rnorm(23, 7, 1);
        let cols = [6, 0, 3];
        let sub = yy.read_columns(&cols, 5)?;
        assert_eq!(sub, yy.select_columns(cols.iter()));

        let rows = yy.read_row_subset(&[4, 22, 0])?;
        assert_eq!(rows.row(1), yy.row(22));

        let blocks = yy
            .row_blocks(10)
            .into_iter()
            .map(|(lb, ub)| yy.read_rows(lb, ub))
            .collect::<anyhow::Result<Vec<_>>>()?;
        assert_eq!(stack_rows(&blocks, 7), yy);
        Ok(())
    }

    #[test]
    fn sparse_rows_are_densified() -> anyhow::Result<()> {
        let mut coo = CooMatrix::<f64>::new(4, 3);
        coo.push(0, 1, 2.0);
        coo.push(2, 0, -1.0);
        coo.push(3, 2, 5.0);
        let csr = CsrMat::from(&coo);

        let block = csr.read_rows(1, 4)?;
        assert_eq!(block.shape(), (3, 3));
        assert_eq!(block[(1, 0)], -1.0);
        assert_eq!(block[(2, 2)], 5.0);
        assert_eq!(block[(0, 1)], 0.0);

        let sub = csr.read_row_subset(&[3, 0])?;
        assert_eq!(sub[(0, 2)], 5.0);
        assert_eq!(sub[(1, 1)], 2.0);
        Ok(())
    }

    #[test]
    fn out_of_range_access_is_a_shape_error() {
        let yy = Mat::zeros(3, 2);
        let err = yy.read_rows(1, 5).unwrap_err();
        assert!(matches!(
            crate::error::ruv_error(&err),
            Some(RuvError::Shape(_))
        ));
        assert!(yy.read_columns(&[2], 10).is_err());
    }
}
