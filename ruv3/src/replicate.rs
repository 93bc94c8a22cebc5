//! Replicate-structure matrix `M` (observations x replicate sets)

use crate::common::*;
use matrix_util::dmatrix_util::row_membership_matrix;
use matrix_util::utils::{encode_levels, partition_by_membership};
use std::hash::Hash;

/// Binary `m x r` matrix; `M[i,j] = 1` if observation `i` belongs to
/// replicate set `j`. Supplied by the caller and never modified.
#[derive(Debug, Clone)]
pub struct ReplicateMatrix {
    mm: Mat,
    /// first replicate set of each observation, `None` if none
    first_set: Vec<Option<usize>>,
    disjoint: bool,
}

impl ReplicateMatrix {
    /// Wrap an indicator matrix; every entry must be 0 or 1
    pub fn new(mm: Mat) -> anyhow::Result<Self> {
        if let Some(x) = mm.iter().find(|&&x| x != 0.0 && x != 1.0) {
            return Err(RuvError::InvalidArgument(format!(
                "replicate matrix must be binary, found {}",
                x
            ))
            .into());
        }

        let first_set = mm
            .row_iter()
            .map(|row| row.iter().position(|&x| x == 1.0))
            .collect();

        let disjoint = mm.row_iter().all(|row| row.sum() <= 1.0);

        Ok(Self {
            mm,
            first_set,
            disjoint,
        })
    }

    /// One replicate set per distinct label, in order of first appearance
    pub fn from_labels<T>(labels: &[T]) -> Self
    where
        T: Eq + Hash + Clone,
    {
        let (index, levels) = encode_levels(labels);
        let mm = row_membership_matrix(&index, levels.len());
        Self {
            mm,
            first_set: index.into_iter().map(Some).collect(),
            disjoint: true,
        }
    }

    pub fn nrows(&self) -> usize {
        self.mm.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.mm.ncols()
    }

    pub fn matrix(&self) -> &Mat {
        &self.mm
    }

    /// No observation belongs to more than one replicate set
    pub fn is_disjoint(&self) -> bool {
        self.disjoint
    }

    /// The residual `Y - M (MᵀM)⁻¹ MᵀY` has no degrees of freedom left
    pub fn saturates(&self) -> bool {
        self.ncols() >= self.nrows()
    }

    /// Every observation in some replicate set, every set non-empty
    pub fn check_membership(&self) -> anyhow::Result<()> {
        if let Some(i) = self.first_set.iter().position(|s| s.is_none()) {
            return Err(RuvError::Degenerate(format!(
                "observation {} belongs to no replicate set",
                i
            ))
            .into());
        }
        if let Some(j) = self.mm.column_iter().position(|col| col.sum() == 0.0) {
            return Err(RuvError::Degenerate(format!("replicate set {} is empty", j)).into());
        }
        Ok(())
    }

    /// Per-observation label: index of the first replicate set it belongs to
    pub fn labels(&self) -> anyhow::Result<Vec<usize>> {
        self.first_set
            .iter()
            .enumerate()
            .map(|(i, s)| {
                s.ok_or_else(|| {
                    RuvError::Degenerate(format!("observation {} belongs to no replicate set", i))
                        .into()
                })
            })
            .collect()
    }

    /// Remove the replicate-set effect from `yy` (m x p):
    /// `Y - M (MᵀM)⁻¹ MᵀY`. Disjoint sets reduce to subtracting the
    /// set means.
    pub fn residualize(&self, yy: &Mat) -> anyhow::Result<Mat> {
        if yy.nrows() != self.nrows() {
            return Err(RuvError::Shape(format!(
                "{} rows in Y but {} rows in the replicate matrix",
                yy.nrows(),
                self.nrows()
            ))
            .into());
        }
        self.check_membership()?;

        let mut resid = yy.clone();

        if self.disjoint {
            let labels = self.labels()?;
            for (_, rows) in partition_by_membership(&labels) {
                let mut mean = yy.row(rows[0]).clone_owned();
                for &i in &rows[1..] {
                    mean += yy.row(i);
                }
                mean /= rows.len() as f64;
                for &i in &rows {
                    let mut r = resid.row_mut(i);
                    r -= &mean;
                }
            }
        } else {
            let mtm = self.mm.transpose() * &self.mm;
            let chol = mtm.cholesky().ok_or_else(|| {
                RuvError::Degenerate("replicate sets are linearly dependent".into())
            })?;
            let beta = chol.solve(&(self.mm.transpose() * yy));
            resid -= &self.mm * beta;
        }

        ensure_finite(&resid, "replicate residual", None)?;
        Ok(resid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ruv_error;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::SampleOps;

    #[test]
    fn labels_round_trip() -> anyhow::Result<()> {
        let rep = ReplicateMatrix::from_labels(&["x", "y", "x", "z"]);
        assert_eq!(rep.ncols(), 3);
        assert!(rep.is_disjoint());
        assert_eq!(rep.labels()?, vec![0, 1, 0, 2]);

        let again = ReplicateMatrix::new(rep.matrix().clone())?;
        assert_eq!(again.labels()?, vec![0, 1, 0, 2]);
        Ok(())
    }

    #[test]
    fn disjoint_residual_matches_projection() -> anyhow::Result<()> {
        let yy = Mat::rnorm(12, 4, 2);
        let labels: Vec<usize> = (0..12).map(|i| i % 3).collect();
        let rep = ReplicateMatrix::from_labels(&labels);

        let fast = rep.residualize(&yy)?;

        let mm = rep.matrix();
        let proj = mm * (mm.transpose() * mm).try_inverse().unwrap() * mm.transpose();
        let slow = &yy - proj * &yy;

        assert_abs_diff_eq!(fast, slow, epsilon = 1e-10);
        // residuals sum to zero within each set
        assert_abs_diff_eq!(mm.transpose() * fast, Mat::zeros(3, 4), epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn overlapping_sets_use_least_squares() -> anyhow::Result<()> {
        let mut mm = Mat::zeros(6, 3);
        for i in 0..3 {
            mm[(i, 0)] = 1.0;
        }
        for i in 3..6 {
            mm[(i, 1)] = 1.0;
        }
        mm[(2, 2)] = 1.0;
        mm[(3, 2)] = 1.0;

        let rep = ReplicateMatrix::new(mm.clone())?;
        assert!(!rep.is_disjoint());

        let yy = Mat::rnorm(6, 2, 4);
        let resid = rep.residualize(&yy)?;
        assert_abs_diff_eq!(mm.transpose() * resid, Mat::zeros(3, 2), epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn all_zero_row_is_degenerate() -> anyhow::Result<()> {
        let mut mm = Mat::zeros(4, 2);
        mm[(0, 0)] = 1.0;
        mm[(1, 0)] = 1.0;
        mm[(2, 1)] = 1.0;

        let rep = ReplicateMatrix::new(mm)?;
        let err = rep.check_membership().unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));
        assert!(rep.residualize(&Mat::zeros(4, 1)).is_err());
        Ok(())
    }

    #[test]
    fn non_binary_entries_are_rejected() {
        let mut mm = Mat::zeros(2, 2);
        mm[(0, 0)] = 0.5;
        assert!(ReplicateMatrix::new(mm).is_err());
    }
}
