use crate::common_io::Delimiter;

/// Scale columns to zero mean and unit standard deviation
pub trait MatOps {
    type Mat;
    type Scalar;

    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;
}

/// Operations to sample random matrices with a fixed seed so that
/// repeated runs produce identical draws
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize, rseed: u64) -> Self::Mat;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize, rseed: u64) -> Self::Mat;
}

/// Singular value decomposition behind a single capability
///
/// Returns `(U, S, V)` with `X ≈ U diag(S) Vᵀ`, singular values in
/// descending order and at most `target_rank` components.
pub trait SvdOps {
    type Mat;
    type DVec;

    fn compute_svd(
        &self,
        xx: &Self::Mat,
        target_rank: usize,
    ) -> anyhow::Result<(Self::Mat, Self::DVec, Self::Mat)>;
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}
