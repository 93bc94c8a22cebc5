//! Per-feature standardization against a batch-only linear model
//!
//! ```text
//! mean[j]     = (1/m) sum_i Y[i,j]
//! fitted[i,j] = mean of Y[,j] within the batch of observation i
//! var[j]      = sum_i (Y[i,j] - fitted[i,j])^2 / (m - #batches)
//! Ystd[i,j]   = (Y[i,j] - mean[j]) / sqrt(var[j])
//! ```

use crate::common::*;
use matrix_util::utils::encode_levels;
use rayon::prelude::*;
use std::hash::Hash;

/// What to do with features whose residual variance is zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroVariance {
    /// Report a degeneracy error
    #[default]
    Error,
    /// Centre the feature but leave it unscaled
    Skip,
}

#[derive(Debug, Clone)]
pub struct StandardizeArgs {
    pub block_size: usize,
    pub zero_variance: ZeroVariance,
}

impl Default for StandardizeArgs {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            zero_variance: ZeroVariance::Error,
        }
    }
}

/// Fitted standardization; reversible through [`Standardized::restore`]
#[derive(Debug, Clone)]
pub struct Standardized {
    /// per-feature mean over all observations
    pub mean: DVec,
    /// per-feature residual variance of the batch-only model
    pub variance: DVec,
    /// divisor actually applied; `sqrt(variance)`, or 1 for skipped features
    scale: DVec,
    /// features left unscaled because of zero variance
    pub skipped: Vec<usize>,
    pub num_batches: usize,
}

pub fn standardize<S, T>(
    yy: &S,
    batch: &[T],
    args: &StandardizeArgs,
) -> anyhow::Result<Standardized>
where
    S: ExprSource + ?Sized,
    T: Eq + Hash + Clone,
{
    let mm = yy.nrows();
    let nn = yy.ncols();

    if batch.len() != mm {
        return Err(RuvError::Shape(format!(
            "batch vector has {} entries for {} observations",
            batch.len(),
            mm
        ))
        .into());
    }

    let (batch_index, levels) = encode_levels(batch);
    let nb = levels.len();

    if nb < 2 {
        return Err(RuvError::Degenerate(format!(
            "standardization needs at least 2 batches, found {}",
            nb
        ))
        .into());
    }

    if mm <= nb {
        return Err(RuvError::Degenerate(format!(
            "{} observations leave no degrees of freedom for {} batches",
            mm, nb
        ))
        .into());
    }

    let blocks = yy.row_blocks(args.block_size);

    // 1. per-batch sums
    let (sum_bn, count_b) = blocks
        .par_iter()
        .map(|&(lb, ub)| -> anyhow::Result<(Mat, Vec<usize>)> {
            let y_block = yy.read_rows(lb, ub)?;
            ensure_finite(&y_block, "standardize", None)?;
            let mut sum_bn = Mat::zeros(nb, nn);
            let mut count_b = vec![0; nb];
            for (r, i) in (lb..ub).enumerate() {
                let b = batch_index[i];
                let mut sum_b = sum_bn.row_mut(b);
                sum_b += y_block.row(r);
                count_b[b] += 1;
            }
            Ok((sum_bn, count_b))
        })
        .try_reduce(
            || (Mat::zeros(nb, nn), vec![0; nb]),
            |(s1, c1), (s2, c2)| {
                let c = c1.iter().zip(c2.iter()).map(|(a, b)| a + b).collect();
                Ok((s1 + s2, c))
            },
        )?;

    let mean = DVec::from_iterator(nn, sum_bn.row_sum().iter().map(|s| s / mm as f64));

    let mut fitted_bn = sum_bn;
    for (b, mut row) in fitted_bn.row_iter_mut().enumerate() {
        row /= count_b[b] as f64;
    }

    // 2. residual sum of squares around the batch means
    let rss = blocks
        .par_iter()
        .map(|&(lb, ub)| -> anyhow::Result<DVec> {
            let y_block = yy.read_rows(lb, ub)?;
            let mut rss = DVec::zeros(nn);
            for (r, i) in (lb..ub).enumerate() {
                let fit = fitted_bn.row(batch_index[i]);
                for j in 0..nn {
                    let e = y_block[(r, j)] - fit[j];
                    rss[j] += e * e;
                }
            }
            Ok(rss)
        })
        .try_reduce(|| DVec::zeros(nn), |a, b| Ok(a + b))?;

    let variance = rss / (mm - nb) as f64;

    let mut scale = DVec::from_element(nn, 1.0);
    let mut skipped = vec![];

    // zero up to rounding in the batch means
    for j in 0..nn {
        let tol = (mm as f64 * f64::EPSILON * (1.0 + mean[j].abs())).powi(2);
        if variance[j] > tol {
            scale[j] = variance[j].sqrt();
        } else {
            match args.zero_variance {
                ZeroVariance::Error => {
                    return Err(RuvError::Degenerate(format!(
                        "feature {} has zero residual variance",
                        j
                    ))
                    .into());
                }
                ZeroVariance::Skip => skipped.push(j),
            }
        }
    }

    if !skipped.is_empty() {
        warn!("{} zero-variance features left unscaled", skipped.len());
    }

    info!(
        "standardized {} x {} matrix against {} batches",
        mm, nn, nb
    );

    Ok(Standardized {
        mean,
        variance,
        scale,
        skipped,
        num_batches: nb,
    })
}

/// Standardize a dense matrix in one call
/// # Returns
/// `(Ystd, fitted standardization)`
pub fn standardize_matrix<T>(
    yy: &Mat,
    batch: &[T],
    args: &StandardizeArgs,
) -> anyhow::Result<(Mat, Standardized)>
where
    T: Eq + Hash + Clone,
{
    let fitted = standardize(yy, batch, args)?;
    Ok((fitted.apply(yy), fitted))
}

impl Standardized {
    pub fn ncols(&self) -> usize {
        self.mean.len()
    }

    /// Divisor applied to each feature
    pub fn scale(&self) -> &DVec {
        &self.scale
    }

    /// `(Y - mean) / sd` on a block with all features
    pub fn apply(&self, y_block: &Mat) -> Mat {
        let mut ret = y_block.clone();
        for (j, mut col) in ret.column_iter_mut().enumerate() {
            col.add_scalar_mut(-self.mean[j]);
            col /= self.scale[j];
        }
        ret
    }

    /// `(Y - mean) / sd` on a block whose columns are the features `cols`
    pub fn apply_columns(&self, y_block: &Mat, cols: &[usize]) -> Mat {
        let mut ret = y_block.clone();
        for (mut col, &j) in ret.column_iter_mut().zip(cols) {
            col.add_scalar_mut(-self.mean[j]);
            col /= self.scale[j];
        }
        ret
    }

    /// `Ystd * sd + mean` on a block with all features
    pub fn restore(&self, z_block: &Mat) -> Mat {
        let mut ret = z_block.clone();
        for (j, mut col) in ret.column_iter_mut().enumerate() {
            col *= self.scale[j];
            col.add_scalar_mut(self.mean[j]);
        }
        ret
    }

    /// `Ystd * sd + mean` on a block whose columns are the features `cols`
    pub fn restore_columns(&self, z_block: &Mat, cols: &[usize]) -> Mat {
        let mut ret = z_block.clone();
        for (mut col, &j) in ret.column_iter_mut().zip(cols) {
            col *= self.scale[j];
            col.add_scalar_mut(self.mean[j]);
        }
        ret
    }

    /// Lazily standardized view of the matrix this was fitted on
    pub fn view<'a, S>(&'a self, source: &'a S) -> StandardizedView<'a, S>
    where
        S: ExprSource + ?Sized,
    {
        StandardizedView {
            source,
            fitted: self,
        }
    }
}

/// Applies a fitted standardization block by block on read
pub struct StandardizedView<'a, S: ?Sized> {
    source: &'a S,
    fitted: &'a Standardized,
}

impl<S> ExprSource for StandardizedView<'_, S>
where
    S: ExprSource + ?Sized,
{
    fn nrows(&self) -> usize {
        self.source.nrows()
    }

    fn ncols(&self) -> usize {
        self.source.ncols()
    }

    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat> {
        Ok(self.fitted.apply(&self.source.read_rows(lb, ub)?))
    }

    fn read_rows_columns(&self, lb: usize, ub: usize, cols: &[usize]) -> anyhow::Result<Mat> {
        let y_block = self.source.read_rows_columns(lb, ub, cols)?;
        Ok(self.fitted.apply_columns(&y_block, cols))
    }

    fn read_row_subset(&self, rows: &[usize]) -> anyhow::Result<Mat> {
        Ok(self.fitted.apply(&self.source.read_row_subset(rows)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ruv_error;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::SampleOps;

    fn two_batches(mm: usize) -> Vec<usize> {
        (0..mm).map(|i| i % 2).collect()
    }

    #[test]
    fn variance_uses_batch_residuals() -> anyhow::Result<()> {
        // feature 0: batch means 0 and 10, within-batch spread +-1
        let yy = Mat::from_row_slice(
            4,
            2,
            &[
                -1.0, 1.0, //
                9.0, 2.0, //
                1.0, 3.0, //
                11.0, 5.0, //
            ],
        );
        let fitted = standardize(&yy, &two_batches(4), &StandardizeArgs::default())?;

        assert_abs_diff_eq!(fitted.mean[0], 5.0, epsilon = 1e-12);
        // residuals -1, -1, 1, 1 over 4 - 2 degrees of freedom
        assert_abs_diff_eq!(fitted.variance[0], 2.0, epsilon = 1e-12);
        // batch means 2 and 3.5; residuals -1, -1.5, 1, 1.5
        assert_abs_diff_eq!(fitted.variance[1], 6.5 / 2.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn restore_inverts_apply() -> anyhow::Result<()> {
        let mut yy = Mat::rnorm(60, 9, 3) * 2.5;
        yy.add_scalar_mut(4.0);
        let batch = two_batches(60);

        let (zz, fitted) = standardize_matrix(&yy, &batch, &StandardizeArgs::default())?;
        assert_eq!(zz.shape(), yy.shape());
        assert_abs_diff_eq!(fitted.restore(&zz), yy, epsilon = 1e-10);

        let cols = [8, 2];
        let sub = fitted.apply_columns(&yy.select_columns(cols.iter()), &cols);
        assert_abs_diff_eq!(sub, zz.select_columns(cols.iter()), epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn block_size_does_not_change_the_fit() -> anyhow::Result<()> {
        let yy = Mat::rnorm(37, 5, 8);
        let batch: Vec<&str> = (0..37).map(|i| if i < 20 { "a" } else { "b" }).collect();

        let one = standardize(&yy, &batch, &StandardizeArgs::default())?;
        let many = standardize(
            &yy,
            &batch,
            &StandardizeArgs {
                block_size: 4,
                ..Default::default()
            },
        )?;
        assert_abs_diff_eq!(one.mean, many.mean, epsilon = 1e-12);
        assert_abs_diff_eq!(one.variance, many.variance, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn single_batch_is_degenerate() {
        let yy = Mat::rnorm(10, 3, 1);
        let err = standardize(&yy, &vec![0; 10], &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));
    }

    #[test]
    fn no_degrees_of_freedom_is_degenerate() {
        let yy = Mat::rnorm(2, 3, 1);
        let err = standardize(&yy, &[0, 1], &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));
    }

    #[test]
    fn batch_length_mismatch_is_a_shape_error() {
        let yy = Mat::rnorm(6, 3, 1);
        let err = standardize(&yy, &[0, 1, 0], &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Shape(_))));
    }

    #[test]
    fn zero_variance_feature_policy() -> anyhow::Result<()> {
        let mut yy = Mat::rnorm(8, 3, 1);
        yy.column_mut(1).fill(3.0);
        let batch = two_batches(8);

        let err = standardize(&yy, &batch, &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));

        let args = StandardizeArgs {
            zero_variance: ZeroVariance::Skip,
            ..Default::default()
        };
        let (zz, fitted) = standardize_matrix(&yy, &batch, &args)?;
        assert_eq!(fitted.skipped, vec![1]);
        assert!(zz.column(1).iter().all(|x| x.abs() < 1e-12));
        Ok(())
    }

    #[test]
    fn small_variance_on_large_offset_is_kept() -> anyhow::Result<()> {
        let mut yy = Mat::rnorm(40, 3, 21);
        let noise = Mat::rnorm(40, 1, 22);
        for i in 0..40 {
            yy[(i, 0)] = 1e4 + 1e-4 * noise[(i, 0)];
        }
        let batch = two_batches(40);

        let (zz, fitted) = standardize_matrix(&yy, &batch, &StandardizeArgs::default())?;
        assert!(fitted.skipped.is_empty());
        assert!(fitted.variance[0] > 1e-9 && fitted.variance[0] < 1e-7);
        assert!(zz.iter().all(|x| x.is_finite()));
        assert_abs_diff_eq!(zz.column(0).mean(), 0.0, epsilon = 1e-6);

        // an exactly repeated large value is still degenerate
        yy.column_mut(0).fill(1e4 + 0.1);
        let err = standardize(&yy, &batch, &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(ruv_error(&err), Some(RuvError::Degenerate(_))));
        Ok(())
    }

    #[test]
    fn non_finite_input_is_reported() {
        let mut yy = Mat::rnorm(8, 3, 1);
        yy[(4, 2)] = f64::INFINITY;
        let err = standardize(&yy, &two_batches(8), &StandardizeArgs::default()).unwrap_err();
        assert!(matches!(
            ruv_error(&err),
            Some(RuvError::NonFinite {
                stage: "standardize",
                ..
            })
        ));
    }
}
