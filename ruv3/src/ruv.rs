//! Replicate-adjusted regression for a single factor count
//!
//! ```text
//! W    = Y[, ctl] acᵀ (ac acᵀ)⁻¹      ac = alpha_k[, ctl]
//! newY = Y - W alpha_k
//! ```

use crate::common::*;
use crate::factor_model::{FactorModel, FactorModelArgs};
use crate::replicate::ReplicateMatrix;
use crate::source::stack_rows;
use matrix_util::dmatrix_svd::SvdMethod;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct RuvArgs {
    pub svd: SvdMethod,
    /// optional upper bound on the factors computed
    pub svd_k: Option<usize>,
    pub block_size: usize,
    /// keep `W` and `alpha` in the output
    pub return_info: bool,
}

impl Default for RuvArgs {
    fn default() -> Self {
        Self {
            svd: SvdMethod::Exact,
            svd_k: None,
            block_size: DEFAULT_BLOCK_SIZE,
            return_info: false,
        }
    }
}

impl RuvArgs {
    /// Factor-model configuration able to serve every `k` up to `max_k`
    pub fn model_args(&self, max_k: usize) -> FactorModelArgs {
        FactorModelArgs {
            max_k: self.svd_k.map_or(max_k, |b| b.min(max_k)),
            svd: self.svd,
            block_size: self.block_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuvOutput {
    /// requested number of factors
    pub k: usize,
    /// factors actually removed
    pub k_used: usize,
    /// corrected standardized matrix, same shape as the input
    pub new_y: Mat,
    /// unwanted factors (m x k_used)
    pub w: Option<Mat>,
    /// loadings (k_used x n)
    pub alpha: Option<Mat>,
}

/// Remove `k` unwanted factors from standardized data
///
/// * `y_std` - standardized expression (m x n)
/// * `controls` - negative-control features
/// * `k` - number of factors
/// * `replicates` - replicate structure (m x r)
/// * `model` - a previously fitted factor model; fitted here when `None`
///
/// # Returns
/// `(output, model)`; pass the model back in for other `k`
pub fn estimate<S>(
    y_std: &S,
    controls: &[usize],
    k: usize,
    replicates: &ReplicateMatrix,
    model: Option<Arc<FactorModel>>,
    args: &RuvArgs,
) -> anyhow::Result<(RuvOutput, Arc<FactorModel>)>
where
    S: ExprSource + ?Sized,
{
    if replicates.nrows() != y_std.nrows() {
        return Err(RuvError::Shape(format!(
            "replicate matrix has {} rows for {} observations",
            replicates.nrows(),
            y_std.nrows()
        ))
        .into());
    }
    crate::factor_model::check_controls(y_std.ncols(), controls, k)?;
    replicates.check_membership()?;

    let model = match model {
        Some(model) => {
            if model.ncols() != y_std.ncols() || model.controls() != controls {
                return Err(RuvError::Shape(
                    "factor model was fitted on different features or controls".into(),
                )
                .into());
            }
            model
        }
        None => Arc::new(FactorModel::fit(
            y_std,
            replicates,
            controls,
            &args.model_args(k),
        )?),
    };

    let out = apply_correction(y_std, &model, k, args)?;
    Ok((out, model))
}

/// Correct every row of `y_std` with `k` factors of a fitted model
pub fn apply_correction<S>(
    y_std: &S,
    model: &FactorModel,
    k: usize,
    args: &RuvArgs,
) -> anyhow::Result<RuvOutput>
where
    S: ExprSource + ?Sized,
{
    let nn = y_std.ncols();
    let corr = model.correction(k, None)?;
    let controls = model.controls();

    if corr.k_used == 0 && k > 0 {
        warn!("k = {}: no unwanted factors available, input returned unchanged", k);
    }

    debug!("correcting with k = {} ({} factors)", k, corr.k_used);

    let parts = y_std
        .row_blocks(args.block_size)
        .into_par_iter()
        .map(|(lb, ub)| -> anyhow::Result<(Mat, Mat)> {
            let y_block = y_std.read_rows(lb, ub)?;
            let y_ctl = y_block.select_columns(controls.iter());
            corr.apply(&y_ctl, &y_block)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (new_blocks, w_blocks): (Vec<Mat>, Vec<Mat>) = parts.into_iter().unzip();
    let new_y = stack_rows(&new_blocks, nn);

    let (w, alpha) = if args.return_info {
        (
            Some(stack_rows(&w_blocks, corr.k_used)),
            Some(corr.alpha().clone()),
        )
    } else {
        (None, None)
    };

    Ok(RuvOutput {
        k,
        k_used: corr.k_used,
        new_y,
        w,
        alpha,
    })
}
