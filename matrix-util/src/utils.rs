use fnv::FnvHashMap as HashMap;
use std::hash::Hash;

/// partition membership vector into groups of indexes
/// # Arguments
/// * `membership` - a vector of membership (E.g., batch or replicate label)
/// # Returns
/// A hashmap: group name -> indexes of the elements
pub fn partition_by_membership<T>(membership: &[T]) -> HashMap<T, Vec<usize>>
where
    T: Eq + Hash + Clone,
{
    let mut groups: HashMap<T, Vec<usize>> = HashMap::default();
    for (i, k) in membership.iter().enumerate() {
        groups.entry(k.clone()).or_default().push(i);
    }
    groups
}

/// Encode arbitrary labels as `0..L` in order of first appearance
/// # Returns
/// `(index of each element, distinct levels)`
pub fn encode_levels<T>(membership: &[T]) -> (Vec<usize>, Vec<T>)
where
    T: Eq + Hash + Clone,
{
    let mut lookup: HashMap<T, usize> = HashMap::default();
    let mut levels = vec![];
    let index = membership
        .iter()
        .map(|k| {
            *lookup.entry(k.clone()).or_insert_with(|| {
                levels.push(k.clone());
                levels.len() - 1
            })
        })
        .collect();
    (index, levels)
}

/// Generate minibatch intervals
/// * `ntot` - number of total samples
/// * `batch_size` - the size of each batch
pub fn generate_minibatch_intervals(ntot: usize, batch_size: usize) -> Vec<(usize, usize)> {
    let batch_size = batch_size.max(1);
    let num_batches = ntot.div_ceil(batch_size);
    (0..num_batches)
        .map(|b| {
            let lb: usize = b * batch_size;
            let ub: usize = ((b + 1) * batch_size).min(ntot);
            (lb, ub)
        })
        .collect::<Vec<_>>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_follow_first_appearance() {
        let (index, levels) = encode_levels(&["b", "a", "b", "c", "a"]);
        assert_eq!(index, vec![0, 1, 0, 2, 1]);
        assert_eq!(levels, vec!["b", "a", "c"]);
    }

    #[test]
    fn partition_collects_indexes() {
        let groups = partition_by_membership(&[1, 2, 1, 1]);
        assert_eq!(groups[&1], vec![0, 2, 3]);
        assert_eq!(groups[&2], vec![1]);
    }

    #[test]
    fn minibatches_cover_everything() {
        assert_eq!(
            generate_minibatch_intervals(10, 4),
            vec![(0, 4), (4, 8), (8, 10)]
        );
        assert!(generate_minibatch_intervals(0, 4).is_empty());
    }
}
