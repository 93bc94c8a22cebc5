//! Unwanted-variation basis estimated once from negative controls
//!
//! ```text
//! Y0        = residual of Y[, ctl] after removing replicate-set means
//! Y0        ≈ U D Vᵀ                          (rank <= max k)
//! fullalpha = Uᵀ Y                            (rank x n)
//! ```
//!
//! The first `k` rows of `fullalpha` are the `k`-factor loadings, so
//! every candidate `k` reuses the same decomposition.

use crate::common::*;
use crate::replicate::ReplicateMatrix;
use fnv::FnvHashSet as HashSet;
use matrix_util::dmatrix_svd::SvdMethod;
use matrix_util::traits::SvdOps;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct FactorModelArgs {
    /// largest number of factors any caller will request
    pub max_k: usize,
    pub svd: SvdMethod,
    pub block_size: usize,
}

impl Default for FactorModelArgs {
    fn default() -> Self {
        Self {
            max_k: 1,
            svd: SvdMethod::Exact,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Immutable after construction; share it with `Arc` across candidates
#[derive(Debug, Clone)]
pub struct FactorModel {
    fullalpha: Mat,
    singular_values: DVec,
    controls: Vec<usize>,
}

/// Controls must be valid, distinct, and outnumber the factors removed
pub fn check_controls(ncols: usize, controls: &[usize], max_k: usize) -> anyhow::Result<()> {
    if controls.is_empty() {
        return Err(RuvError::Degenerate("no negative-control features".into()).into());
    }
    if let Some(&j) = controls.iter().find(|&&j| j >= ncols) {
        return Err(RuvError::Shape(format!(
            "control feature {} out of {} features",
            j, ncols
        ))
        .into());
    }
    let distinct: HashSet<usize> = controls.iter().copied().collect();
    if distinct.len() != controls.len() {
        return Err(
            RuvError::InvalidArgument("control features contain duplicates".into()).into(),
        );
    }
    if max_k >= controls.len() {
        return Err(RuvError::Degenerate(format!(
            "k = {} needs more than {} negative controls",
            max_k,
            controls.len()
        ))
        .into());
    }
    Ok(())
}

impl FactorModel {
    /// Estimate `fullalpha` from standardized data
    ///
    /// * `y_std` - standardized expression (m x n)
    /// * `replicates` - replicate structure (m x r)
    /// * `controls` - negative-control feature indexes
    pub fn fit<S>(
        y_std: &S,
        replicates: &ReplicateMatrix,
        controls: &[usize],
        args: &FactorModelArgs,
    ) -> anyhow::Result<Self>
    where
        S: ExprSource + ?Sized,
    {
        let mm = y_std.nrows();
        let nn = y_std.ncols();

        if replicates.nrows() != mm {
            return Err(RuvError::Shape(format!(
                "replicate matrix has {} rows for {} observations",
                replicates.nrows(),
                mm
            ))
            .into());
        }
        check_controls(nn, controls, args.max_k)?;
        replicates.check_membership()?;

        if replicates.saturates() || args.max_k == 0 {
            warn!(
                "no factors to estimate ({} replicate sets, {} observations, max k = {})",
                replicates.ncols(),
                mm,
                args.max_k
            );
            return Ok(Self::empty(nn, controls));
        }

        // 1. residual among controls
        let y_ctl = y_std.read_columns(controls, args.block_size)?;
        ensure_finite(&y_ctl, "factor model", None)?;
        let y0 = replicates.residualize(&y_ctl)?;

        // 2. left singular vectors of the residual
        let svd_failed = |reason: String| RuvError::Backend {
            backend: args.svd.name(),
            stage: "factor model",
            reason,
        };

        let (uu, dd, _) = args
            .svd
            .compute_svd(&y0, args.max_k)
            .map_err(|e| svd_failed(e.to_string()))?;

        ensure_finite(&uu, "factor model", None)?;

        let s_max = dd.iter().copied().fold(0.0, f64::max);
        let tol = s_max * f64::EPSILON * (mm.max(controls.len()) as f64);
        let rank = dd.iter().take_while(|&&s| s > tol).count();

        if rank < dd.len() {
            warn!(
                "control residual has rank {}; dropping {} null components",
                rank,
                dd.len() - rank
            );
        }
        if rank == 0 {
            return Ok(Self::empty(nn, controls));
        }

        let uu = uu.columns(0, rank).into_owned();
        let dd = dd.rows(0, rank).into_owned();

        // 3. fullalpha = Uᵀ Y, accumulated over row blocks
        let fullalpha = y_std
            .row_blocks(args.block_size)
            .into_par_iter()
            .map(|(lb, ub)| -> anyhow::Result<Mat> {
                let y_block = y_std.read_rows(lb, ub)?;
                Ok(uu.rows(lb, ub - lb).transpose() * y_block)
            })
            .try_reduce(|| Mat::zeros(rank, nn), |a, b| Ok(a + b))?;

        ensure_finite(&fullalpha, "factor model", None)?;

        info!(
            "factor model: {} factors from {} controls ({} SVD)",
            rank,
            controls.len(),
            args.svd.name()
        );

        Ok(Self {
            fullalpha,
            singular_values: dd,
            controls: controls.to_vec(),
        })
    }

    /// Rebuild a model from a stored loading matrix
    pub fn from_parts(fullalpha: Mat, controls: Vec<usize>) -> anyhow::Result<Self> {
        check_controls(fullalpha.ncols(), &controls, 0)?;
        ensure_finite(&fullalpha, "factor model", None)?;
        let rank = fullalpha.nrows();
        Ok(Self {
            fullalpha,
            singular_values: DVec::from_element(rank, f64::NAN),
            controls,
        })
    }

    fn empty(ncols: usize, controls: &[usize]) -> Self {
        Self {
            fullalpha: Mat::zeros(0, ncols),
            singular_values: DVec::zeros(0),
            controls: controls.to_vec(),
        }
    }

    /// Number of factors available
    pub fn rank(&self) -> usize {
        self.fullalpha.nrows()
    }

    /// Number of features
    pub fn ncols(&self) -> usize {
        self.fullalpha.ncols()
    }

    pub fn controls(&self) -> &[usize] {
        &self.controls
    }

    pub fn fullalpha(&self) -> &Mat {
        &self.fullalpha
    }

    /// Singular values of the control residual; NaN for models
    /// rebuilt with [`FactorModel::from_parts`]
    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    /// `k` limited to the available rank
    pub fn effective_k(&self, k: usize) -> usize {
        if k > self.rank() {
            warn!(
                "k = {} exceeds the {} stored factors; using {}",
                k,
                self.rank(),
                self.rank()
            );
        }
        k.min(self.rank())
    }

    /// Prepare the `k`-factor correction, optionally for a feature subset
    pub fn correction(&self, k: usize, genes: Option<&[usize]>) -> anyhow::Result<Correction> {
        if k >= self.controls.len() {
            return Err(RuvError::Degenerate(format!(
                "k = {} needs more than {} negative controls",
                k,
                self.controls.len()
            ))
            .into());
        }
        if let Some(genes) = genes {
            crate::source::check_columns(self.ncols(), genes)?;
        }

        let k_used = self.effective_k(k);
        let alpha = self.fullalpha.rows(0, k_used);

        let alpha_out = match genes {
            Some(genes) => alpha.select_columns(genes.iter()),
            None => alpha.into_owned(),
        };

        let projector = if k_used > 0 {
            // W = Y[, ctl] acᵀ (ac acᵀ)⁻¹
            let ac = alpha.select_columns(self.controls.iter());
            let gram = &ac * ac.transpose();
            let chol = gram.cholesky().ok_or_else(|| {
                RuvError::Degenerate(format!(
                    "control loadings are rank deficient at k = {}",
                    k_used
                ))
            })?;
            let proj = chol.solve(&ac).transpose();
            ensure_finite(&proj, "factor regression", Some(k))?;
            proj
        } else {
            Mat::zeros(self.controls.len(), 0)
        };

        Ok(Correction {
            k,
            k_used,
            projector,
            alpha: alpha_out,
        })
    }
}

/// The `k`-factor correction; applies row block by row block
#[derive(Debug, Clone)]
pub struct Correction {
    pub k: usize,
    pub k_used: usize,
    /// |ctl| x k
    projector: Mat,
    /// k x (selected features)
    alpha: Mat,
}

impl Correction {
    /// Unwanted factors `W` of the observations in `y_ctl` (rows x |ctl|)
    pub fn unwanted_factors(&self, y_ctl: &Mat) -> Mat {
        y_ctl * &self.projector
    }

    /// Corrected block and its unwanted factors
    ///
    /// * `y_ctl` - rows x controls, standardized
    /// * `y_out` - same rows x selected features, standardized
    pub fn apply(&self, y_ctl: &Mat, y_out: &Mat) -> anyhow::Result<(Mat, Mat)> {
        if y_ctl.ncols() != self.projector.nrows() || y_out.ncols() != self.alpha.ncols() {
            return Err(RuvError::Shape(format!(
                "correction expects {} control and {} output columns, got {} and {}",
                self.projector.nrows(),
                self.alpha.ncols(),
                y_ctl.ncols(),
                y_out.ncols()
            ))
            .into());
        }
        let ww = self.unwanted_factors(y_ctl);
        let new_y = if self.k_used > 0 {
            y_out - &ww * &self.alpha
        } else {
            y_out.clone()
        };
        ensure_finite(&new_y, "factor regression", Some(self.k))?;
        Ok((new_y, ww))
    }

    /// Loadings restricted to the selected features
    pub fn alpha(&self) -> &Mat {
        &self.alpha
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ruv_error;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::SampleOps;

    fn toy(mm: usize, nn: usize) -> (Mat, ReplicateMatrix, Vec<usize>) {
        let labels: Vec<usize> = (0..mm).map(|i| i % 4).collect();
        let yy = Mat::rnorm(mm, nn, 17);
        (yy, ReplicateMatrix::from_labels(&labels), (0..10).collect())
    }

    #[test]
    fn fullalpha_has_max_k_rows() -> anyhow::Result<()> {
        let (yy, rep, ctl) = toy(40, 30);
        let args = FactorModelArgs {
            max_k: 5,
            ..Default::default()
        };
        let model = FactorModel::fit(&yy, &rep, &ctl, &args)?;
        assert_eq!(model.rank(), 5);
        assert_eq!(model.ncols(), 30);
        assert_eq!(model.fullalpha().shape(), (5, 30));
        Ok(())
    }

    #[test]
    fn blocks_do_not_change_the_basis() -> anyhow::Result<()> {
        let (yy, rep, ctl) = toy(40, 30);
        let whole = FactorModel::fit(
            &yy,
            &rep,
            &ctl,
            &FactorModelArgs {
                max_k: 3,
                ..Default::default()
            },
        )?;
        let chunked = FactorModel::fit(
            &yy,
            &rep,
            &ctl,
            &FactorModelArgs {
                max_k: 3,
                block_size: 7,
                ..Default::default()
            },
        )?;
        assert_abs_diff_eq!(whole.fullalpha(), chunked.fullalpha(), epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn too_few_controls_is_degenerate() {
        let (yy, rep, _) = toy(40, 30);
        let ctl: Vec<usize> = (0..3).collect();
        let args = FactorModelArgs {
            max_k: 3,
            ..Default::default()
        };
        let err = FactorModel::fit(&yy, &rep, &ctl, &args).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));
    }

    #[test]
    fn saturated_replicates_give_an_empty_model() -> anyhow::Result<()> {
        let yy = Mat::rnorm(6, 12, 1);
        let rep = ReplicateMatrix::from_labels(&(0..6).collect::<Vec<_>>());
        let ctl: Vec<usize> = (0..8).collect();
        let args = FactorModelArgs {
            max_k: 2,
            ..Default::default()
        };
        let model = FactorModel::fit(&yy, &rep, &ctl, &args)?;
        assert_eq!(model.rank(), 0);

        let corr = model.correction(2, None)?;
        assert_eq!(corr.k_used, 0);
        let (new_y, ww) = corr.apply(&yy.select_columns(ctl.iter()), &yy)?;
        assert_eq!(new_y, yy);
        assert_eq!(ww.ncols(), 0);
        Ok(())
    }

    #[test]
    fn correction_removes_control_signal() -> anyhow::Result<()> {
        let (yy, rep, ctl) = toy(40, 30);
        let args = FactorModelArgs {
            max_k: 4,
            ..Default::default()
        };
        let model = FactorModel::fit(&yy, &rep, &ctl, &args)?;
        let corr = model.correction(4, None)?;
        let (new_y, ww) = corr.apply(&yy.select_columns(ctl.iter()), &yy)?;
        assert_eq!(ww.shape(), (40, 4));

        // the corrected controls are orthogonal to the estimated loadings
        let ac = model.fullalpha().rows(0, 4).select_columns(ctl.iter());
        let new_ctl = new_y.select_columns(ctl.iter());
        assert_abs_diff_eq!(new_ctl * ac.transpose(), Mat::zeros(40, 4), epsilon = 1e-8);
        Ok(())
    }
}
