use crate::domain::ports::OtpGenerator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Uniform numeric codes with no leading zero, e.g. `1000..=9999` for 4 digits.
pub struct RandomOtp {
    rng: Mutex<StdRng>,
}

impl RandomOtp {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible codes, for replays and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomOtp {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpGenerator for RandomOtp {
    fn generate(&self, digits: usize) -> String {
        let low = 10u32.pow(digits as u32 - 1);
        let high = 10u32.pow(digits as u32);
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(low..high).to_string()
    }
}

/// Always hands out the same code.
pub struct FixedOtp(pub String);

impl OtpGenerator for FixedOtp {
    fn generate(&self, _digits: usize) -> String {
        self.0.clone()
    }
}
