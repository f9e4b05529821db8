use log::debug;
use sha2::{Digest, Sha512};
use std::error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod mt19937;

use mt19937::Mt19937;

#[derive(Debug)]
pub enum KrngError {
    // The process secret was never provided, or is empty; every keyed
    // operation requires it.
    Uninitialized,

    // The cancellation flag was observed at an operation checkpoint.
    Canceled,
}

impl error::Error for KrngError {}
impl fmt::Display for KrngError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Uninitialized => {
                write!(f, "secret key has not been set")
            }
            Self::Canceled => {
                write!(f, "operation canceled")
            }
        }
    }
}

/// Process-wide secret combined with every marker id.
///
/// Captured once at program start and passed explicitly into keyed
/// operations; it never changes afterwards.
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new<B: Into<Vec<u8>>>(bytes: B) -> Secret {
        Secret {
            bytes: bytes.into(),
        }
    }

    /// Read the secret from an environment variable, typically `SECRET_KEY`.
    pub fn from_env(var: &str) -> Result<Secret, KrngError> {
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value.into_bytes())),
            _ => Err(KrngError::Uninitialized),
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Reproducible generator backing every keyed draw.
///
/// An embed and its paired detect construct the same `Rng` from the same
/// `(marker id, secret)` pair and must request draws in the same order and
/// arity; that lockstep is what makes detection possible without persisted
/// side-data.
pub struct Rng {
    mt: Mt19937,
}

impl Rng {
    /// Seed from an arbitrary little-endian limb key.
    fn from_key(key: &[u32]) -> Rng {
        Rng {
            mt: Mt19937::from_key(key),
        }
    }

    /// Local generator for value transforms, seeded by a small integer.
    pub fn from_seed(seed: u64) -> Rng {
        let low = seed as u32;
        let high = (seed >> 32) as u32;
        if high == 0 {
            Rng::from_key(&[low])
        } else {
            Rng::from_key(&[low, high])
        }
    }

    /// Uniform integer in `[0, range)`, by power-of-two mask rejection.
    fn below(&mut self, range: u64) -> u64 {
        let max = range.saturating_sub(1);
        if max == 0 {
            return 0;
        }
        if max <= u64::from(u32::MAX) {
            let mut mask = max as u32;
            mask |= mask >> 1;
            mask |= mask >> 2;
            mask |= mask >> 4;
            mask |= mask >> 8;
            mask |= mask >> 16;
            loop {
                let draw = self.mt.next_u32() & mask;
                if u64::from(draw) <= max {
                    return u64::from(draw);
                }
            }
        }
        let mut mask = max;
        mask |= mask >> 1;
        mask |= mask >> 2;
        mask |= mask >> 4;
        mask |= mask >> 8;
        mask |= mask >> 16;
        mask |= mask >> 32;
        loop {
            let draw = self.mt.next_u64() & mask;
            if draw <= max {
                return draw;
            }
        }
    }

    /// Uniform integer in `[lo, hi)`.
    pub fn int(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.below(hi.saturating_sub(lo))
    }

    /// `n` uniform integers in `[lo, hi)`, drawn in order.
    pub fn ints(&mut self, lo: u64, hi: u64, n: usize) -> Vec<u64> {
        (0..n).map(|_| self.int(lo, hi)).collect()
    }

    /// Uniform float in the closed interval bounded by `a` and `b`.
    ///
    /// The operands may arrive in either order; equal bounds short-circuit
    /// without consuming a draw.
    pub fn float(&mut self, a: f64, b: f64) -> f64 {
        if a == b {
            return a;
        }
        let (lo, hi) = if a > b { (b, a) } else { (a, b) };
        self.mt.next_f64() * (hi - lo) + lo
    }
}

/// Derive the reproducible generator for a marker.
///
/// The seed is the SHA-512 digest of the marker id concatenated with the
/// secret, interpreted as a 512-bit integer and fed to the generator as its
/// sixteen little-endian 32-bit limbs. Same `(marker_id, secret)`, same
/// sequence of draws.
pub fn rng_for(marker_id: &str, secret: &Secret) -> Result<Rng, KrngError> {
    if secret.bytes().is_empty() {
        return Err(KrngError::Uninitialized);
    }
    let mut hasher = Sha512::new();
    hasher.update(marker_id.as_bytes());
    hasher.update(secret.bytes());
    let digest = hasher.finalize();
    // rchunks yields the least significant limb first; each limb is
    // big-endian within the digest.
    let mut key = [0u32; 16];
    for (limb, chunk) in key.iter_mut().zip(digest.rchunks(4)) {
        *limb = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    debug!("derived marker seed [marker_id={:?}]", marker_id);
    Ok(Rng::from_key(&key))
}

/// Best-effort cancellation flag, polled at operation checkpoints.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn checkpoint(&self) -> Result<(), KrngError> {
        if self.is_canceled() {
            Err(KrngError::Canceled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}
