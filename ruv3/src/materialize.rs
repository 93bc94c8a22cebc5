//! Corrected submatrices from a stored factor model
//!
//! Inputs must be in the standardized space the model was fitted in.
//! Raw counts or differently scaled data are accepted without complaint
//! and give a wrong answer.

use crate::common::*;
use crate::factor_model::{Correction, FactorModel};
use crate::source::{check_columns, check_rows, stack_rows};
use crate::standardize::Standardized;
use rayon::prelude::*;

/// Which corrected entries to produce and on what scale
///
/// There is no separate row-means input: `restore` carries the
/// per-feature means and scales of the fit, and the output is returned
/// as `Ystd * scale + mean` for the selected features when it is set.
#[derive(Debug, Clone)]
pub struct MaterializeArgs<'a> {
    pub k: usize,
    /// observations to produce; all when `None`
    pub rows: Option<&'a [usize]>,
    /// features to produce; all when `None`
    pub genes: Option<&'a [usize]>,
    /// per-feature means and scales; undoes the standardization on the way out
    pub restore: Option<&'a Standardized>,
    pub block_size: usize,
}

impl Default for MaterializeArgs<'_> {
    fn default() -> Self {
        Self {
            k: 0,
            rows: None,
            genes: None,
            restore: None,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Corrected `rows x genes` submatrix
///
/// * `y_std` - standardized source with every feature the model knows
/// * `model` - fitted factor model
pub fn materialize<S>(
    y_std: &S,
    model: &FactorModel,
    args: &MaterializeArgs,
) -> anyhow::Result<Mat>
where
    S: ExprSource + ?Sized,
{
    let view = CorrectedView::new(y_std, model, args.k, args.genes)?;
    let view = match args.restore {
        Some(fitted) => view.restored(fitted)?,
        None => view,
    };

    match args.rows {
        Some(rows) => view.read_row_subset(rows),
        None => {
            let blocks = view
                .row_blocks(args.block_size)
                .into_par_iter()
                .map(|(lb, ub)| view.read_rows(lb, ub))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(stack_rows(&blocks, view.ncols()))
        }
    }
}

/// Lazily corrected source: each row block is corrected when read
pub struct CorrectedView<'a, S: ?Sized> {
    source: &'a S,
    correction: Correction,
    controls: &'a [usize],
    genes: Vec<usize>,
    restore: Option<&'a Standardized>,
}

impl<'a, S> CorrectedView<'a, S>
where
    S: ExprSource + ?Sized,
{
    pub fn new(
        source: &'a S,
        model: &'a FactorModel,
        k: usize,
        genes: Option<&[usize]>,
    ) -> anyhow::Result<Self> {
        if source.ncols() != model.ncols() {
            return Err(RuvError::Shape(format!(
                "source has {} features, factor model {}",
                source.ncols(),
                model.ncols()
            ))
            .into());
        }
        let genes = match genes {
            Some(genes) => {
                check_columns(source.ncols(), genes)?;
                genes.to_vec()
            }
            None => (0..source.ncols()).collect(),
        };
        Ok(Self {
            source,
            correction: model.correction(k, Some(genes.as_slice()))?,
            controls: model.controls(),
            genes,
            restore: None,
        })
    }

    /// Report corrected values on the original scale
    pub fn restored(mut self, fitted: &'a Standardized) -> anyhow::Result<Self> {
        if fitted.ncols() != self.source.ncols() {
            return Err(RuvError::Shape(format!(
                "standardization has {} features, source {}",
                fitted.ncols(),
                self.source.ncols()
            ))
            .into());
        }
        self.restore = Some(fitted);
        Ok(self)
    }

    pub fn k_used(&self) -> usize {
        self.correction.k_used
    }

    fn correct(&self, y_ctl: &Mat, y_out: &Mat) -> anyhow::Result<Mat> {
        let (new_y, _) = self.correction.apply(y_ctl, y_out)?;
        Ok(match self.restore {
            Some(fitted) => fitted.restore_columns(&new_y, &self.genes),
            None => new_y,
        })
    }
}

impl<S> ExprSource for CorrectedView<'_, S>
where
    S: ExprSource + ?Sized,
{
    fn nrows(&self) -> usize {
        self.source.nrows()
    }

    fn ncols(&self) -> usize {
        self.genes.len()
    }

    fn read_rows(&self, lb: usize, ub: usize) -> anyhow::Result<Mat> {
        let y_ctl = self.source.read_rows_columns(lb, ub, self.controls)?;
        let y_out = self.source.read_rows_columns(lb, ub, &self.genes)?;
        self.correct(&y_ctl, &y_out)
    }

    fn read_row_subset(&self, rows: &[usize]) -> anyhow::Result<Mat> {
        check_rows(self.nrows(), rows)?;
        let y_sub = self.source.read_row_subset(rows)?;
        let y_ctl = y_sub.select_columns(self.controls.iter());
        let y_out = y_sub.select_columns(self.genes.iter());
        self.correct(&y_ctl, &y_out)
    }
}
