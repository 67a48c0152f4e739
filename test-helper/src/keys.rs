use rand::Rng;

/// Generates `n` random partition keys.
///
/// Keys are drawn from a pool smaller than `n` so the same key shows up more
/// than once.
pub fn random_keys(n: usize) -> Vec<String> {
    let pool = (n / 4).max(1);
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| format!("key-{}", rng.gen_range(0..pool)))
        .collect()
}
