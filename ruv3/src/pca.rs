//! Block-wise randomized PCA for scoring corrected matrices
//!
//! Only `m x l` sketches and `l x n` products are held in memory;
//! the source is read one row block at a time.

use crate::common::*;
use crate::source::stack_rows;
use matrix_util::dmatrix_svd::SvdMethod;
use matrix_util::traits::{SampleOps, SvdOps};
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct PcaArgs {
    pub num_pcs: usize,
    pub oversample: usize,
    pub power_iter: usize,
    pub seed: u64,
    pub block_size: usize,
}

impl Default for PcaArgs {
    fn default() -> Self {
        Self {
            num_pcs: DEFAULT_NUM_PCS,
            oversample: 10,
            power_iter: 2,
            seed: 42,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Principal component scores of the rows of `source`
///
/// # Returns
/// `m x d` scores, `d = min(num_pcs, m - 1, n)`
pub fn block_pca<S>(source: &S, args: &PcaArgs) -> anyhow::Result<Mat>
where
    S: ExprSource + ?Sized,
{
    let mm = source.nrows();
    let nn = source.ncols();

    if mm < 2 || nn == 0 {
        return Err(RuvError::Shape(format!("cannot run PCA on [{} x {}]", mm, nn)).into());
    }
    if args.num_pcs == 0 {
        return Err(RuvError::InvalidArgument("num_pcs must be positive".into()).into());
    }

    let dd = args.num_pcs.min(mm - 1).min(nn);
    let ll = (dd + args.oversample).min(mm).min(nn);
    let jobs = source.row_blocks(args.block_size);

    // 1. column means
    let mu = jobs
        .par_iter()
        .map(|&(lb, ub)| -> anyhow::Result<DVec> {
            let y_block = source.read_rows(lb, ub)?;
            Ok(y_block.row_sum().transpose())
        })
        .try_reduce(|| DVec::zeros(nn), |a, b| Ok(a + b))?
        / (mm as f64);

    let centred_block = |lb: usize, ub: usize| -> anyhow::Result<Mat> {
        let mut y_block = source.read_rows(lb, ub)?;
        for (j, mut col) in y_block.column_iter_mut().enumerate() {
            col.add_scalar_mut(-mu[j]);
        }
        Ok(y_block)
    };

    // Y_c H, stacked over blocks
    let right_multiply = |hh: &Mat| -> anyhow::Result<Mat> {
        let blocks = jobs
            .par_iter()
            .map(|&(lb, ub)| -> anyhow::Result<Mat> { Ok(centred_block(lb, ub)? * hh) })
            .collect::<anyhow::Result<Vec<Mat>>>()?;
        Ok(stack_rows(&blocks, hh.ncols()))
    };

    // Qᵀ Y_c, summed over blocks
    let left_multiply = |qq: &Mat| -> anyhow::Result<Mat> {
        jobs.par_iter()
            .map(|&(lb, ub)| -> anyhow::Result<Mat> {
                Ok(qq.rows(lb, ub - lb).transpose() * centred_block(lb, ub)?)
            })
            .try_reduce(|| Mat::zeros(qq.ncols(), nn), |a, b| Ok(a + b))
    };

    // 2. range finder with power iterations
    let omega = Mat::rnorm(nn, ll, args.seed);
    let mut qq = right_multiply(&omega)?.qr().q();

    for it in 0..args.power_iter {
        let hh = left_multiply(&qq)?.transpose().qr().q();
        qq = right_multiply(&hh)?.qr().q();
        debug!("PCA power iteration {}/{}", it + 1, args.power_iter);
    }

    // 3. small SVD
    let bb = left_multiply(&qq)?;
    ensure_finite(&bb, "pca", None)?;

    let (u_b, s_b, _) = SvdMethod::Exact
        .compute_svd(&bb, dd)
        .map_err(|e| RuvError::Backend {
            backend: "exact",
            stage: "pca",
            reason: e.to_string(),
        })?;

    let dd = s_b.len();
    let mut scores = qq * u_b.columns(0, dd);
    for (mut col, &s) in scores.column_iter_mut().zip(s_b.iter()) {
        col *= s;
    }

    ensure_finite(&scores, "pca", None)?;
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn low_rank_scores_match_exact_pca() -> anyhow::Result<()> {
        let left = Mat::rnorm(50, 3, 1);
        let right = Mat::rnorm(3, 40, 2);
        let mut yy = &left * &right;
        yy.add_scalar_mut(3.0);

        let args = PcaArgs {
            num_pcs: 3,
            block_size: 8,
            ..Default::default()
        };
        let scores = block_pca(&yy, &args)?;
        assert_eq!(scores.shape(), (50, 3));

        let mut yc = yy.clone();
        for mut col in yc.column_iter_mut() {
            let m = col.mean();
            col.add_scalar_mut(-m);
        }
        // scores are U S up to column signs, so compare U S² Uᵀ = Yc Ycᵀ
        assert_abs_diff_eq!(
            &scores * scores.transpose(),
            &yc * yc.transpose(),
            epsilon = 1e-6
        );
        Ok(())
    }

    #[test]
    fn pcs_are_bounded_by_the_data() -> anyhow::Result<()> {
        let yy = Mat::rnorm(6, 4, 3);
        let scores = block_pca(&yy, &PcaArgs::default())?;
        assert_eq!(scores.shape(), (6, 4));
        Ok(())
    }

    #[test]
    fn seeded_runs_agree() -> anyhow::Result<()> {
        let yy = Mat::rnorm(30, 20, 4);
        let args = PcaArgs {
            num_pcs: 4,
            ..Default::default()
        };
        assert_eq!(block_pca(&yy, &args)?, block_pca(&yy, &args)?);
        Ok(())
    }
}
