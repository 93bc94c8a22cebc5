//! Interchangeable SVD backends
//!
//! A backend is selected by a tagged variant rather than a
//! configuration object; all variants go through [`SvdOps`].

use crate::dmatrix_rsvd::RSVD;
use crate::traits::SvdOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f64>;
type DVec = DVector<f64>;

const SVD_MAX_ITER: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SvdMethod {
    /// Full thin SVD; no rank bound beyond the request
    #[default]
    Exact,
    /// Leading eigenpairs of the smaller Gram matrix, at most `rank`
    Truncated { rank: usize },
    /// Randomized subspace iteration, at most `rank`, seeded
    Randomized { rank: usize, seed: u64 },
}

impl SvdMethod {
    /// Upper bound on the number of components this backend computes
    pub fn rank_bound(&self) -> Option<usize> {
        match self {
            SvdMethod::Exact => None,
            SvdMethod::Truncated { rank } | SvdMethod::Randomized { rank, .. } => Some(*rank),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SvdMethod::Exact => "exact",
            SvdMethod::Truncated { .. } => "truncated",
            SvdMethod::Randomized { .. } => "randomized",
        }
    }
}

impl SvdOps for SvdMethod {
    type Mat = Mat;
    type DVec = DVec;

    fn compute_svd(&self, xx: &Mat, target_rank: usize) -> anyhow::Result<(Mat, DVec, Mat)> {
        if xx.nrows() == 0 || xx.ncols() == 0 {
            anyhow::bail!("empty [{} x {}] matrix", xx.nrows(), xx.ncols());
        }
        if !xx.iter().all(|x| x.is_finite()) {
            anyhow::bail!("non-finite values in the SVD input");
        }

        let rank = match self.rank_bound() {
            Some(bound) => target_rank.min(bound),
            None => target_rank,
        }
        .min(xx.nrows().min(xx.ncols()));

        if rank == 0 {
            anyhow::bail!("requested a rank-0 decomposition");
        }

        debug!(
            "{} SVD on [{} x {}], rank {}",
            self.name(),
            xx.nrows(),
            xx.ncols(),
            rank
        );

        let (uu, dd, vv) = match self {
            SvdMethod::Exact => exact_svd(xx)?,
            SvdMethod::Truncated { .. } => gram_svd(xx, rank)?,
            SvdMethod::Randomized { seed, .. } => xx.rsvd(rank, *seed)?,
        };

        Ok(sort_and_truncate(uu, dd, vv, rank))
    }
}

/// Thin SVD by one-sided Jacobi/Golub-Kahan as implemented in nalgebra
pub fn exact_svd(xx: &Mat) -> anyhow::Result<(Mat, DVec, Mat)> {
    let svd = xx
        .clone()
        .try_svd(true, true, f64::EPSILON, SVD_MAX_ITER)
        .ok_or_else(|| anyhow::anyhow!("SVD did not converge in {} iterations", SVD_MAX_ITER))?;

    match (svd.u, svd.v_t) {
        (Some(uu), Some(vt)) => Ok((uu, svd.singular_values, vt.transpose())),
        _ => anyhow::bail!("SVD failed to produce singular vectors"),
    }
}

/// Truncated SVD through the eigen-decomposition of the smaller Gram
/// matrix (`X Xᵀ` if `X` is wide, `Xᵀ X` if tall)
pub fn gram_svd(xx: &Mat, rank: usize) -> anyhow::Result<(Mat, DVec, Mat)> {
    let wide = xx.nrows() <= xx.ncols();
    let gram = if wide {
        xx * xx.transpose()
    } else {
        xx.transpose() * xx
    };

    let gdim = gram.nrows();
    let eig = gram
        .try_symmetric_eigen(f64::EPSILON, SVD_MAX_ITER)
        .ok_or_else(|| anyhow::anyhow!("eigen-decomposition did not converge"))?;

    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));

    let tol = eig.eigenvalues.amax() * f64::EPSILON * (gdim as f64);
    let kept: Vec<usize> = order
        .into_iter()
        .take(rank)
        .filter(|&j| eig.eigenvalues[j] > tol)
        .collect();

    if kept.is_empty() {
        anyhow::bail!("Gram matrix has no positive eigenvalue");
    }

    let dd = DVec::from_iterator(kept.len(), kept.iter().map(|&j| eig.eigenvalues[j].sqrt()));
    let basis = eig.eigenvectors.select_columns(kept.iter());

    // recover the other side: X v = s u, Xᵀ u = s v
    let mut other = if wide {
        xx.transpose() * &basis
    } else {
        xx * &basis
    };
    for (j, mut col) in other.column_iter_mut().enumerate() {
        col /= dd[j];
    }

    if wide {
        Ok((basis, dd, other))
    } else {
        Ok((other, dd, basis))
    }
}

fn sort_and_truncate(uu: Mat, dd: DVec, vv: Mat, rank: usize) -> (Mat, DVec, Mat) {
    let mut order: Vec<usize> = (0..dd.len()).collect();
    order.sort_by(|&a, &b| dd[b].total_cmp(&dd[a]));
    order.truncate(rank);

    (
        uu.select_columns(order.iter()),
        DVec::from_iterator(order.len(), order.iter().map(|&j| dd[j])),
        vv.select_columns(order.iter()),
    )
}
