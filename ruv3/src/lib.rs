//! Removing unwanted variation (RUV-III) from expression matrices
//!
//! Observations (cells) are rows and features (genes) are columns
//! throughout the public interface.

pub mod common; // shared type aliases
pub mod error; // error taxonomy
pub mod factor_model; // unwanted-variation basis fitted on controls
pub mod materialize; // corrected matrices from a stored factor model
pub mod pca; // block-wise randomized PCA
pub mod pipeline; // standardize, select, restore
pub mod replicate; // replicate-structure matrix
pub mod ruv; // replicate-adjusted regression
pub mod select; // choosing the number of factors
pub mod simulate; // synthetic batch-affected data
pub mod source; // block access to expression matrices
pub mod standardize; // per-feature batch-aware standardization
