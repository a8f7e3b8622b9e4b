//! Train / held-out split.
//!
//! Stratified when every class has at least two samples; otherwise a plain
//! random split, which changes what the evaluation report means and so is
//! logged at `warn`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Row indices of each partition, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
    pub stratified: bool,
}

/// Number of held-out rows for `n` samples: `ceil(n * ratio)`, kept in
/// `1..n` so both partitions are non-empty when `n >= 2`.
pub fn test_size(n: usize, ratio: f64) -> usize {
    if n < 2 {
        return 0;
    }
    ((n as f64 * ratio).ceil() as usize).clamp(1, n - 1)
}

fn class_indices(labels: &[String]) -> BTreeMap<&str, Vec<usize>> {
    let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(label.as_str()).or_default().push(i);
    }
    by_class
}

/// Split `labels` row indices into train and held-out partitions.
pub fn train_test_split(labels: &[String], test_ratio: f64, seed: u64) -> Split {
    let n = labels.len();
    let n_test = test_size(n, test_ratio);
    let mut rng = StdRng::seed_from_u64(seed);
    let by_class = class_indices(labels);

    let min_count = by_class.values().map(Vec::len).min().unwrap_or(0);
    if min_count < 2 {
        tracing::warn!(
            classes = by_class.len(),
            min_class_size = min_count,
            "not enough samples per class for a stratified split; using a random split"
        );
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let mut test = order[..n_test].to_vec();
        let mut train = order[n_test..].to_vec();
        test.sort_unstable();
        train.sort_unstable();
        return Split {
            train,
            test,
            stratified: false,
        };
    }

    let allocation = allocate(&by_class, n, n_test);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (class, mut rows) in by_class {
        rows.shuffle(&mut rng);
        let take = allocation[class];
        test.extend_from_slice(&rows[..take]);
        train.extend_from_slice(&rows[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    Split {
        train,
        test,
        stratified: true,
    }
}

/// Largest-remainder allocation of `n_test` rows across classes, never
/// taking a class's last training row.
fn allocate<'a>(
    by_class: &BTreeMap<&'a str, Vec<usize>>,
    n: usize,
    n_test: usize,
) -> BTreeMap<&'a str, usize> {
    let mut alloc = BTreeMap::new();
    let mut remainders = Vec::with_capacity(by_class.len());
    let mut assigned = 0;

    for (&class, rows) in by_class {
        let exact = rows.len() as f64 * n_test as f64 / n as f64;
        let base = (exact.floor() as usize).min(rows.len() - 1);
        assigned += base;
        alloc.insert(class, base);
        remainders.push((class, exact - base as f64));
    }

    // Highest fractional part first; BTreeMap order breaks ties by name.
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut left = n_test.saturating_sub(assigned);
    while left > 0 {
        let mut progressed = false;
        for (class, _) in &remainders {
            if left == 0 {
                break;
            }
            let cap = by_class[class].len() - 1;
            let slot = alloc.entry(*class).or_insert(0);
            if *slot < cap {
                *slot += 1;
                left -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    alloc
}
