//! Synthetic expression with cell types and batch-driven unwanted factors
//!
//! ```text
//! Y = mu + sqrt(pve) * C beta + sqrt(lambda) * W alpha + sqrt(1 - pve - lambda) * E
//! W = B delta + noise       (batch-driven unwanted factors)
//! beta[, ctl] = 0           (controls carry no cell-type signal)
//! ```
//! Each of `C beta`, `W alpha` and `E` is scaled to unit column variance.

use crate::common::*;
use matrix_util::dmatrix_util::row_membership_matrix;
use matrix_util::traits::*;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};

#[derive(Debug, Clone)]
pub struct SimArgs {
    pub cells: usize,
    pub genes: usize,
    /// the first `controls` genes are negative controls
    pub controls: usize,
    pub cell_types: usize,
    pub batches: usize,
    /// number of unwanted factors
    pub factors: usize,
    /// variance share of the unwanted factors
    pub lambda: f64,
    /// variance share of the cell-type signal on non-control genes
    pub pve_cell_type: f64,
    pub rseed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            cells: 200,
            genes: 1000,
            controls: 100,
            cell_types: 3,
            batches: 2,
            factors: 2,
            lambda: 0.1,
            pve_cell_type: 0.5,
            rseed: 42,
        }
    }
}

pub struct SimOut {
    /// cells x genes
    pub yy: Mat,
    pub batch: Vec<usize>,
    pub cell_type: Vec<usize>,
    pub controls: Vec<usize>,
    /// cells x factors
    pub w: Mat,
    /// factors x genes
    pub alpha: Mat,
}

impl SimOut {
    pub fn num_factors(&self) -> usize {
        self.w.ncols()
    }
}

pub fn generate_ruv_data(args: &SimArgs) -> anyhow::Result<SimOut> {
    let mm = args.cells;
    let nn = args.genes;
    let kk = args.factors;

    if mm < 2 || nn == 0 || args.cell_types == 0 || args.batches == 0 {
        return Err(RuvError::InvalidArgument(format!(
            "need cells >= 2, genes, cell types and batches (got {}, {}, {}, {})",
            mm, nn, args.cell_types, args.batches
        ))
        .into());
    }
    if args.controls > nn {
        return Err(RuvError::InvalidArgument(format!(
            "{} controls out of {} genes",
            args.controls, nn
        ))
        .into());
    }
    let pve = args.pve_cell_type.clamp(0., 1.);
    let lambda = args.lambda.clamp(0., 1.);
    if pve + lambda > 1.0 {
        return Err(RuvError::InvalidArgument(format!(
            "pve_cell_type + lambda = {} exceeds 1",
            pve + lambda
        ))
        .into());
    }

    let rseed = args.rseed;
    let mut rng = rand::rngs::StdRng::seed_from_u64(rseed);

    // 1. memberships
    let runif = Uniform::new(0, args.batches)?;
    let batch: Vec<usize> = (0..mm).map(|_| runif.sample(&mut rng)).collect();
    let runif = Uniform::new(0, args.cell_types)?;
    let cell_type: Vec<usize> = (0..mm).map(|_| runif.sample(&mut rng)).collect();
    let controls: Vec<usize> = (0..args.controls).collect();

    // 2. cell-type signal, absent on controls
    let mut beta = Mat::rnorm(args.cell_types, nn, rseed.wrapping_add(1));
    for &j in &controls {
        beta.column_mut(j).fill(0.0);
    }
    let mut signal = row_membership_matrix(&cell_type, args.cell_types) * beta;
    scale_nonconstant_columns(&mut signal);
    info!("simulated {} cell types", args.cell_types);

    // 3. batch-driven unwanted factors
    let (w, alpha, unwanted) = if kk > 0 {
        let delta = Mat::rnorm(args.batches, kk, rseed.wrapping_add(2)) * 2.0;
        let mut w = row_membership_matrix(&batch, args.batches) * delta
            + Mat::rnorm(mm, kk, rseed.wrapping_add(3)) * 0.5;
        w.scale_columns_inplace();
        let alpha = Mat::rnorm(kk, nn, rseed.wrapping_add(4));
        let mut unwanted = &w * &alpha;
        unwanted.scale_columns_inplace();
        (w, alpha, unwanted)
    } else {
        (Mat::zeros(mm, 0), Mat::zeros(0, nn), Mat::zeros(mm, nn))
    };
    info!("simulated {} unwanted factors across {} batches", kk, args.batches);

    // 4. putting them all together
    let mut noise = Mat::rnorm(mm, nn, rseed.wrapping_add(5));
    noise.scale_columns_inplace();

    let baseline = Mat::runif(1, nn, rseed.wrapping_add(6)) * 4.0;

    let mut yy = signal * pve.sqrt()
        + unwanted * lambda.sqrt()
        + noise * (1.0 - pve - lambda).max(0.0).sqrt();
    for (j, mut col) in yy.column_iter_mut().enumerate() {
        col.add_scalar_mut(2.0 + baseline[(0, j)]);
    }

    Ok(SimOut {
        yy,
        batch,
        cell_type,
        controls,
        w,
        alpha,
    })
}

/// Standardize columns with variance; leave constant ones at zero
fn scale_nonconstant_columns(xx: &mut Mat) {
    for mut col in xx.column_iter_mut() {
        let mu = col.mean();
        col.add_scalar_mut(-mu);
        let sd = col.norm() / ((col.len().max(2) - 1) as f64).sqrt();
        if sd > 0.0 {
            col /= sd;
        }
    }
}
