use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// a reseedable source of Uniform(0,1) draws. both the choice draw and the
/// destination sampler consume this; given the same seed and the same call
/// order they must reproduce the same stream.
pub trait UniformSource {
    fn uniform01(&mut self) -> f64;

    fn reseed(&mut self, seed: i32);
}

/// Wichmann-Hill combined congruential generator. three 16-bit-ish state
/// words with prime moduli 30269/30307/30323; the fractional part of the sum
/// of the three normalized states is the draw.
///
/// this is the reproducibility anchor of the engine: sampler draw slots are
/// each seeded from a per-observation seed array, so a rerun with the same
/// seeds replays the identical sample.
#[derive(Debug, Clone)]
pub struct RandomUniform01 {
    seed: i32,
    sy: i32,
    sz: i32,
}

impl RandomUniform01 {
    pub fn new(seed: i32) -> RandomUniform01 {
        let mut source = RandomUniform01 {
            seed: 0,
            sy: 0,
            sz: 0,
        };
        source.reseed(seed);
        source
    }
}

impl Default for RandomUniform01 {
    fn default() -> Self {
        RandomUniform01::new(1)
    }
}

impl UniformSource for RandomUniform01 {
    fn uniform01(&mut self) -> f64 {
        let r = self.seed / 177;
        let s = self.seed - 177 * r;
        self.seed = 171 * s - 2 * r;
        if self.seed < 0 {
            self.seed += 30269;
        }

        let r = self.sy / 176;
        let s = self.sy - 176 * r;
        self.sy = 172 * s - 35 * r;
        if self.sy < 0 {
            self.sy += 30307;
        }

        let r = self.sz / 178;
        let s = self.sz - 178 * r;
        self.sz = 170 * s - 63 * r;
        if self.sz < 0 {
            self.sz += 30323;
        }

        let f = f64::from(self.seed) / 30269.0
            + f64::from(self.sy) / 30307.0
            + f64::from(self.sz) / 30323.0;

        f - f.trunc()
    }

    fn reseed(&mut self, seed: i32) {
        // only the low 16 bits of the seed participate, matching the
        // historical estimation runs this generator must replay
        self.seed = seed & 0xffff;
        self.sy = 10000;
        self.sz = 3000;
    }
}

/// per-lane random bundle: a reproducible uniform stream for choice draws,
/// a rand-backed generator for sampler seed arrays, and normal/log-normal
/// transforms layered on the uniform stream.
///
/// each worker lane owns exactly one of these; nothing here is shared.
pub struct RandomUtility {
    uniform: RandomUniform01,
    seeder: StdRng,
}

impl RandomUtility {
    pub fn new(seed: u64) -> RandomUtility {
        RandomUtility {
            uniform: RandomUniform01::new(seed as i32),
            seeder: StdRng::seed_from_u64(seed),
        }
    }

    /// seed values for the sampler's per-slot generators, drawn in the i16
    /// range so that the 16-bit masking in [`RandomUniform01::reseed`] is
    /// lossless.
    pub fn seed_values(&mut self, size: usize) -> Vec<i32> {
        (0..size)
            .map(|_| self.seeder.random_range(i32::from(i16::MIN)..=i32::from(i16::MAX)))
            .collect()
    }

    pub fn reseed_uniform(&mut self, seed: i32) {
        self.uniform.reseed(seed);
    }

    /// draws from N(mean, std_dev) by the ratio-of-uniforms method of
    /// Kinderman and Monahan with quadratic bounding curves (ACM TOMS
    /// algorithm 712).
    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        const S: f64 = 0.449871;
        const T: f64 = -0.386595;
        const A: f64 = 0.19600;
        const B: f64 = 0.25472;
        const R1: f64 = 0.27597;
        const R2: f64 = 0.27846;
        const VMULT: f64 = 1.7156;
        const TINY: f64 = 1e-12;

        loop {
            let mut u = self.uniform01();
            while u < TINY {
                u = self.uniform01();
            }
            let v = VMULT * (self.uniform01() - 0.5);

            let x = u - S;
            let y = v.abs() - T;
            let q = x * x + y * (A * y - B * x);

            if q < R1 || (q <= R2 && v * v < -4.0 * u.ln() * u * u) {
                return mean + std_dev * (v / u);
            }
        }
    }

    /// draws from a log-normal with the given arithmetic mean and standard
    /// deviation. non-positive parameters collapse to zero rather than
    /// erroring; callers treat that as "no draw".
    pub fn log_normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        const TINY: f64 = 1e-12;

        if mean <= TINY || std_dev <= TINY {
            return 0.0;
        }

        let c = std_dev / mean;
        let c_sqr = c * c;
        let m = mean.ln() - 0.5 * (c_sqr + 1.0).ln();
        let s = (c_sqr + 1.0).ln().sqrt();

        self.normal(m, s).exp()
    }
}

impl UniformSource for RandomUtility {
    fn uniform01(&mut self) -> f64 {
        self.uniform.uniform01()
    }

    fn reseed(&mut self, seed: i32) {
        self.uniform.reseed(seed);
    }
}
