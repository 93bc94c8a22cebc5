//! Standardize, select the number of factors, restore the scale

use crate::common::*;
use crate::replicate::ReplicateMatrix;
use crate::select::{select, SelectArgs, SelectObserver, SelectOutput};
use crate::standardize::{standardize, StandardizeArgs, Standardized};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct PipelineArgs {
    pub standardize: StandardizeArgs,
    pub select: SelectArgs,
    /// report corrected matrices on the original scale
    pub restore: bool,
}

impl Default for PipelineArgs {
    fn default() -> Self {
        Self {
            standardize: StandardizeArgs::default(),
            select: SelectArgs::default(),
            restore: true,
        }
    }
}

pub struct PipelineOutput {
    pub selected: SelectOutput,
    pub standardized: Standardized,
}

/// RUV-III on raw expression
///
/// * `yy` - expression (m x n), observations in rows
/// * `batch` - batch label per observation
/// * `replicates` - replicate structure (m x r)
/// * `controls` - negative-control features
/// * `candidates` - factor counts to try
/// * `cell_type` - optional biological labels for scoring
#[allow(clippy::too_many_arguments)]
pub fn run_ruv3<S, C, T>(
    yy: &S,
    batch: &[T],
    replicates: &ReplicateMatrix,
    controls: &[usize],
    candidates: &[usize],
    cell_type: Option<&[C]>,
    args: &PipelineArgs,
    observer: Option<&dyn SelectObserver>,
) -> anyhow::Result<PipelineOutput>
where
    S: ExprSource + ?Sized,
    C: Eq + Hash + Clone + Sync,
    T: Eq + Hash + Clone + Sync,
{
    info!(
        "RUV-III on {} x {} with {} controls and k in {:?}",
        yy.nrows(),
        yy.ncols(),
        controls.len(),
        candidates
    );

    let standardized = standardize(yy, batch, &args.standardize)?;
    let y_std = standardized.view(yy);

    let mut selected = select(
        &y_std,
        replicates,
        controls,
        candidates,
        cell_type,
        batch,
        &args.select,
        observer,
    )?;

    if args.restore {
        for out in selected.results.iter_mut() {
            out.new_y = standardized.restore(&out.new_y);
        }
    }

    Ok(PipelineOutput {
        selected,
        standardized,
    })
}
