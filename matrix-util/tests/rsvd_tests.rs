use matrix_util::dmatrix_rsvd::RSVD;
use matrix_util::traits::SampleOps;

#[test]
fn dmatrix_rsvd_test() -> anyhow::Result<()> {
    let mut xx = nalgebra::DMatrix::<f64>::zeros(8, 8);
    xx.fill_with_identity();

    let svd = xx.rsvd(3, 1)?;

    assert_eq!(svd.0.shape(), (8, 3));
    assert_eq!(svd.2.shape(), (8, 3));

    for s in svd.1.iter() {
        approx::assert_abs_diff_eq!(*s, 1.0, epsilon = 1e-10);
    }

    approx::assert_abs_diff_eq!(
        svd.0.transpose() * &svd.0,
        nalgebra::DMatrix::<f64>::identity(3, 3),
        epsilon = 1e-10
    );

    Ok(())
}

#[test]
fn rsvd_recovers_leading_spectrum() -> anyhow::Result<()> {
    let aa = nalgebra::DMatrix::<f64>::rnorm(100, 4, 5);
    let bb = nalgebra::DMatrix::<f64>::rnorm(4, 60, 6);
    let xx = aa * bb + nalgebra::DMatrix::<f64>::rnorm(100, 60, 7) * 1e-3;

    let (_, dd, _) = xx.rsvd(4, 2)?;
    let exact = xx.clone().svd(false, false).singular_values;

    let mut exact = exact.iter().copied().collect::<Vec<_>>();
    exact.sort_by(|a, b| b.total_cmp(a));

    for j in 0..4 {
        approx::assert_relative_eq!(dd[j], exact[j], max_relative = 1e-4);
    }
    Ok(())
}
