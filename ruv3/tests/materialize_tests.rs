use approx::assert_abs_diff_eq;
use ruv3::common::*;
use ruv3::factor_model::FactorModel;
use ruv3::materialize::{materialize, CorrectedView, MaterializeArgs};
use ruv3::replicate::ReplicateMatrix;
use ruv3::ruv::{estimate, RuvArgs};
use ruv3::simulate::{generate_ruv_data, SimArgs};
use ruv3::standardize::{standardize, StandardizeArgs};

#[test]
fn stored_model_reproduces_any_submatrix() -> anyhow::Result<()> {
    let sim = generate_ruv_data(&SimArgs {
        cells: 90,
        genes: 150,
        controls: 25,
        ..Default::default()
    })?;
    let std_args = StandardizeArgs {
        block_size: 13,
        ..Default::default()
    };
    let fitted = standardize(&sim.yy, &sim.batch, &std_args)?;
    let y_std = fitted.apply(&sim.yy);
    let replicates = ReplicateMatrix::from_labels(&sim.cell_type);

    let k = 4;
    let (full, model) = estimate(
        &y_std,
        &sim.controls,
        k,
        &replicates,
        None,
        &RuvArgs::default(),
    )?;

    // the loadings are all a stored model needs
    let stored = FactorModel::from_parts(model.fullalpha().clone(), sim.controls.clone())?;
    assert_eq!(stored.rank(), model.rank());

    // rows and genes in arbitrary order, read from a sparse copy
    let sparse = CsrMat::from(&sim.yy);
    let view = fitted.view(&sparse);
    let rows: Vec<usize> = (0..90).rev().step_by(7).collect();
    let genes: Vec<usize> = (3..150).step_by(11).chain([0, 24]).collect();

    let sub = materialize(
        &view,
        &stored,
        &MaterializeArgs {
            k,
            rows: Some(&rows),
            genes: Some(&genes),
            ..Default::default()
        },
    )?;
    let expected = full
        .new_y
        .select_rows(rows.iter())
        .select_columns(genes.iter());
    assert_eq!(sub.shape(), (rows.len(), genes.len()));
    assert_abs_diff_eq!(sub, expected, epsilon = 1e-9);
    Ok(())
}

#[test]
fn corrected_view_streams_blocks() -> anyhow::Result<()> {
    let sim = generate_ruv_data(&SimArgs {
        cells: 40,
        genes: 60,
        controls: 12,
        ..Default::default()
    })?;
    let fitted = standardize(&sim.yy, &sim.batch, &StandardizeArgs::default())?;
    let y_std = fitted.apply(&sim.yy);
    let replicates = ReplicateMatrix::from_labels(&sim.cell_type);
    let args = RuvArgs::default();
    let (full, model) = estimate(&y_std, &sim.controls, 3, &replicates, None, &args)?;

    let view = CorrectedView::new(&y_std, &model, 3, None)?;
    assert_eq!(view.k_used(), 3);
    for (lb, ub) in view.row_blocks(9) {
        let block = view.read_rows(lb, ub)?;
        let expected = full.new_y.rows(lb, ub - lb).into_owned();
        assert_abs_diff_eq!(block, expected, epsilon = 1e-10);
    }

    let restored = CorrectedView::new(&y_std, &model, 3, None)?.restored(&fitted)?;
    let first = restored.read_rows(0, 5)?;
    let expected = fitted.restore(&full.new_y.rows(0, 5).into_owned());
    assert_abs_diff_eq!(first, expected, epsilon = 1e-10);
    Ok(())
}
