use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub const DEFAULT_SEED: u64 = 0x_5453_515F_5350_414E; // fixed seed for stable benchmarks

#[derive(Clone, Debug)]
pub struct PointOp {
    pub host: String,
    pub ts: u64,
    pub value: i64,
}

/// `points` samples spread over `hosts` series, one every `step` seconds per series.
pub fn generate_points(seed: u64, points: usize, hosts: usize, step: u64) -> Vec<PointOp> {
    assert!(hosts > 0);
    assert!(step > 0);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(points);
    for i in 0..points {
        ops.push(PointOp {
            host: format!("host{}", i % hosts),
            ts: (i / hosts) as u64 * step,
            value: rng.random_range(0..10_000),
        });
    }
    ops
}
