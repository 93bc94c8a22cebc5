use thiserror::Error;

/// Every failure the engine reports on purpose.
///
/// Functions return `anyhow::Result`; match on the category with
/// `err.downcast_ref::<RuvError>()`.
#[derive(Debug, Error)]
pub enum RuvError {
    /// Dimensions of Y, M, batch, cell types or controls disagree
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// The problem is ill-posed for the given input
    #[error("degenerate input: {0}")]
    Degenerate(String),

    /// An argument outside its valid range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// NaN or infinite values appeared
    #[error("non-finite values in stage `{stage}`{}", fmt_k(.k))]
    NonFinite {
        stage: &'static str,
        k: Option<usize>,
    },

    /// The SVD backend failed
    #[error("{backend} SVD failed in stage `{stage}`: {reason}")]
    Backend {
        backend: &'static str,
        stage: &'static str,
        reason: String,
    },

    /// No candidate factor count produced a result
    #[error("all {0} candidate factor counts failed")]
    AllCandidatesFailed(usize),
}

fn fmt_k(k: &Option<usize>) -> String {
    match k {
        Some(k) => format!(" (k = {})", k),
        None => String::new(),
    }
}

/// Look up the category of an error raised by this crate
pub fn ruv_error(err: &anyhow::Error) -> Option<&RuvError> {
    err.chain().find_map(|e| e.downcast_ref::<RuvError>())
}
