//! Size-dependent lifetime bound for uploaded files.
//!
//! Small files may live up to `max_age`; the allowance shrinks quadratically
//! with size until it reaches `min_age` at `max_size` bytes.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetentionError {
    #[error("minimum age ({0}s) must not exceed maximum age ({1}s)")]
    InvertedBounds(u64, u64),
    #[error("retention curve needs a non-zero maximum size")]
    ZeroSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCurve {
    min_age: u64,
    max_age: u64,
    max_size: u64,
}

impl RetentionCurve {
    pub fn new(min_age: u64, max_age: u64, max_size: u64) -> Result<Self, RetentionError> {
        if min_age > max_age {
            return Err(RetentionError::InvertedBounds(min_age, max_age));
        }
        if max_size == 0 {
            return Err(RetentionError::ZeroSize);
        }

        Ok(Self {
            min_age,
            max_age,
            max_size,
        })
    }

    /// Maximum lifetime in seconds for a payload of `size` bytes.
    pub fn compute_for(&self, size: u64) -> u64 {
        if size >= self.max_size {
            return self.min_age;
        }

        let window = (self.max_age - self.min_age) as f64;
        let ratio = size as f64 / self.max_size as f64;
        let retention = self.max_age as f64 - window * ratio.powi(2);

        tracing::trace!("retention of {}s for a {} byte payload", retention, size);

        retention as u64
    }
}
