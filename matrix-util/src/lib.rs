pub mod common_io; // reading and writing lines, gzipped or not
pub mod dmatrix_io; // delimited text I/O for dense matrices
pub mod dmatrix_rsvd; // randomized SVD
pub mod dmatrix_svd; // exact, truncated and randomized SVD backends
pub mod dmatrix_util; // column operations and sampling
pub mod silhouette; // clustering quality
pub mod traits;
pub mod utils;
