// Host-side randomness for seeding streamlines and the GPU particle hash.
//
// A seed string in the configuration makes every run reproducible. Without
// one, a fresh seed is drawn from the thread RNG.

use rand::distr::Alphanumeric;
use rand::prelude::*;
use rand_pcg::Pcg32;
use rand_seeder::Seeder;

pub type SeepRng = Pcg32;

pub fn from_seed(optional_seed: &Option<String>) -> SeepRng {
    let seed = optional_seed.as_ref().cloned().unwrap_or_else(|| {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    });

    Seeder::from(seed).into_rng()
}
