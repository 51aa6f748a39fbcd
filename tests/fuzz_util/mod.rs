#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_SEED: u64 = 0x5EED_7AB1_E1D3_0001;

/// Parameters of one fuzz run, tunable through `OXITABLE_FUZZ_*` variables
#[derive(Debug, Clone, Copy)]
pub struct FuzzParams {
    pub seed: u64,
    pub steps: usize,
    pub key_space: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Resolve parameters for the fuzz target `target`.
///
/// Each target derives its own stream from the shared seed, so setting
/// `OXITABLE_FUZZ_SEED` reproduces every target at once.
pub fn params(target: &str, default_steps: usize, default_key_space: u64) -> FuzzParams {
    let base_seed = env_parse("OXITABLE_FUZZ_SEED").unwrap_or(DEFAULT_SEED);
    FuzzParams {
        seed: xxhash_rust::xxh3::xxh3_64_with_seed(target.as_bytes(), base_seed),
        steps: env_parse("OXITABLE_FUZZ_STEPS").unwrap_or(default_steps),
        key_space: env_parse::<u64>("OXITABLE_FUZZ_KEY_SPACE")
            .unwrap_or(default_key_space)
            .max(1),
    }
}

pub fn verbose() -> bool {
    env_parse::<u8>("OXITABLE_FUZZ_VERBOSE").is_some_and(|v| v != 0)
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Key drawn from `key-0 .. key-{key_space - 1}`
pub fn choose_key(rng: &mut StdRng, key_space: u64) -> String {
    format!("key-{}", rng.gen_range(0..key_space))
}
