pub use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::traits::*;

impl SampleOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn runif(dd: usize, nn: usize, rseed: u64) -> Self::Mat {
        let mut rng = StdRng::seed_from_u64(rseed);
        DMatrix::from_fn(dd, nn, |_, _| rng.random::<f64>())
    }

    fn rnorm(dd: usize, nn: usize, rseed: u64) -> Self::Mat {
        let mut rng = StdRng::seed_from_u64(rseed);
        DMatrix::from_fn(dd, nn, |_, _| rng.sample::<f64, _>(StandardNormal))
    }
}

impl MatOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn scale_columns_inplace(&mut self) {
        let nn = self.nrows() as f64;
        for mut xx_j in self.column_iter_mut() {
            let mu = xx_j.mean();
            xx_j.add_scalar_mut(-mu);
            if nn > 1.0 {
                let sig = (xx_j.norm_squared() / (nn - 1.0)).sqrt();
                if sig > 0.0 {
                    xx_j /= sig;
                }
            }
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }
}

/// Check if every element is finite
pub fn all_finite(xx: &DMatrix<f64>) -> bool {
    xx.iter().all(|x| x.is_finite())
}

/// Binary indicator matrix: `Z[i, membership[i]] = 1`
/// * `membership` - group index of each row
/// * `ngroups` - number of columns
pub fn row_membership_matrix(membership: &[usize], ngroups: usize) -> DMatrix<f64> {
    let mut zz = DMatrix::<f64>::zeros(membership.len(), ngroups);
    for (i, &k) in membership.iter().enumerate() {
        if k < ngroups {
            zz[(i, k)] = 1.0;
        }
    }
    zz
}
