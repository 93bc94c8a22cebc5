use matrix_util::traits::SampleOps;
use ruv3::common::*;
use ruv3::error::ruv_error;
use ruv3::replicate::ReplicateMatrix;
use ruv3::ruv::{estimate, RuvArgs};
use ruv3::select::{select, SelectArgs};
use ruv3::standardize::{standardize, StandardizeArgs};

fn is_degenerate(err: &anyhow::Error) -> bool {
    matches!(ruv_error(err), Some(RuvError::Degenerate(_)))
}

#[test]
fn single_batch_fails_standardization() {
    let yy = Mat::rnorm(20, 5, 1);
    let batch = vec!["only"; 20];
    let err = standardize(&yy, &batch, &StandardizeArgs::default()).unwrap_err();
    assert!(is_degenerate(&err));
}

#[test]
fn unassigned_observation_fails_estimation() -> anyhow::Result<()> {
    let yy = Mat::rnorm(12, 10, 2);
    let mut mm = Mat::zeros(12, 3);
    for i in 0..11 {
        mm[(i, i % 3)] = 1.0;
    }
    let replicates = ReplicateMatrix::new(mm)?;
    let controls: Vec<usize> = (0..5).collect();
    let err = estimate(&yy, &controls, 2, &replicates, None, &RuvArgs::default()).unwrap_err();
    assert!(is_degenerate(&err));
    Ok(())
}

#[test]
fn too_many_factors_for_the_controls() {
    let yy = Mat::rnorm(30, 10, 3);
    let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
    let replicates = ReplicateMatrix::from_labels(&labels);
    let controls = vec![0, 1, 2, 3];

    let err = estimate(&yy, &controls, 4, &replicates, None, &RuvArgs::default()).unwrap_err();
    assert!(is_degenerate(&err));

    let batch: Vec<usize> = (0..30).map(|i| i % 2).collect();
    let err = select::<_, usize, _>(
        &yy,
        &replicates,
        &controls,
        &[1, 2, 5],
        None,
        &batch,
        &SelectArgs::default(),
        None,
    )
    .unwrap_err();
    assert!(is_degenerate(&err));
}

#[test]
fn mismatched_lengths_are_shape_errors() {
    let yy = Mat::rnorm(30, 10, 4);
    let labels: Vec<usize> = (0..29).map(|i| i % 3).collect();
    let replicates = ReplicateMatrix::from_labels(&labels);
    let err = estimate(&yy, &[0, 1, 2], 1, &replicates, None, &RuvArgs::default()).unwrap_err();
    assert!(matches!(ruv_error(&err), Some(RuvError::Shape(_))));

    let err = standardize(&yy, &[0usize, 1], &StandardizeArgs::default()).unwrap_err();
    assert!(matches!(ruv_error(&err), Some(RuvError::Shape(_))));
}

#[test]
fn non_finite_expression_is_reported() {
    let mut yy = Mat::rnorm(30, 10, 5);
    yy[(4, 2)] = f64::NAN;
    let labels: Vec<usize> = (0..30).map(|i| i % 3).collect();
    let replicates = ReplicateMatrix::from_labels(&labels);
    let err = estimate(&yy, &[0, 1, 2, 3], 2, &replicates, None, &RuvArgs::default()).unwrap_err();
    assert!(matches!(
        ruv_error(&err),
        Some(RuvError::NonFinite { .. })
    ));
}
