pub use log::{debug, info, warn};
pub use std::sync::Arc;

pub use crate::error::RuvError;
pub use crate::source::ExprSource;

pub type Mat = nalgebra::DMatrix<f64>;
pub type DVec = nalgebra::DVector<f64>;
pub type CsrMat = nalgebra_sparse::CsrMatrix<f64>;

/// Rows read per block in block-wise passes
pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Principal components used to score candidate corrections
pub const DEFAULT_NUM_PCS: usize = 10;

/// Fail with a `NonFinite` error if any element is NaN or infinite
pub fn ensure_finite(xx: &Mat, stage: &'static str, k: Option<usize>) -> anyhow::Result<()> {
    if matrix_util::dmatrix_util::all_finite(xx) {
        Ok(())
    } else {
        Err(RuvError::NonFinite { stage, k }.into())
    }
}
