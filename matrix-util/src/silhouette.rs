//! Silhouette coefficients over the rows of a dense embedding

use nalgebra::DMatrix;
use rayon::prelude::*;

/// Silhouette coefficient of each row of `points` (n x d) given the
/// group index of each row.
///
/// For a row `i` in group `A`, `a(i)` is its mean Euclidean distance
/// to the other members of `A` and `b(i)` the smallest mean distance
/// to the members of any other group; `s(i) = (b - a) / max(a, b)`.
/// Rows in a singleton group get `s(i) = 0`.
///
pub fn silhouette_samples(points: &DMatrix<f64>, labels: &[usize]) -> anyhow::Result<Vec<f64>> {
    let nn = points.nrows();
    if nn != labels.len() {
        anyhow::bail!(
            "{} points but {} labels for silhouette",
            nn,
            labels.len()
        );
    }

    let ngroups = labels.iter().max().map(|&k| k + 1).unwrap_or(0);
    let mut sizes = vec![0usize; ngroups];
    for &k in labels {
        sizes[k] += 1;
    }
    let nonempty = sizes.iter().filter(|&&s| s > 0).count();
    if nonempty < 2 {
        anyhow::bail!("silhouette needs at least 2 groups, found {}", nonempty);
    }

    // columns are contiguous in nalgebra
    let pts_dn = points.transpose();

    let scores = (0..nn)
        .into_par_iter()
        .map(|i| {
            let own = labels[i];
            if sizes[own] < 2 {
                return 0.0;
            }

            let x_i = pts_dn.column(i);
            let mut dist_sum = vec![0.0; ngroups];
            for j in 0..nn {
                if j != i {
                    let d2: f64 = x_i
                        .iter()
                        .zip(pts_dn.column(j).iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    dist_sum[labels[j]] += d2.sqrt();
                }
            }

            let a = dist_sum[own] / (sizes[own] - 1) as f64;
            let b = (0..ngroups)
                .filter(|&k| k != own && sizes[k] > 0)
                .map(|k| dist_sum[k] / sizes[k] as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .collect();

    Ok(scores)
}

/// Average silhouette coefficient, in `[-1, 1]`
pub fn silhouette_score(points: &DMatrix<f64>, labels: &[usize]) -> anyhow::Result<f64> {
    let scores = silhouette_samples(points, labels)?;
    Ok(scores.iter().sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_separated_groups_score_high() {
        let points = DMatrix::from_row_slice(
            6,
            2,
            &[
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                10.0, 10.0, //
                10.1, 10.0, //
                10.0, 10.1, //
            ],
        );
        let score = silhouette_score(&points, &[0, 0, 0, 1, 1, 1]).unwrap();
        assert!(score > 0.9, "expected high score, got {}", score);
    }

    #[test]
    fn singleton_group_scores_zero() {
        let points = DMatrix::from_row_slice(3, 1, &[0.0, 0.1, 5.0]);
        let scores = silhouette_samples(&points, &[0, 0, 1]).unwrap();
        assert_eq!(scores[2], 0.0);
        assert!(scores[0] > 0.9);
    }

    #[test]
    fn single_group_is_an_error() {
        let points = DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 2.0]);
        assert!(silhouette_score(&points, &[0, 0, 0]).is_err());
        assert!(silhouette_score(&points, &[0, 0]).is_err());
    }
}
