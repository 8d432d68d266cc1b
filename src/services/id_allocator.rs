//! Identifier allocation.
//!
//! File ids are the client-supplied name, validated and returned unchanged so
//! that a repeated `PUT` lands on the same id. Paste and redirect ids are short
//! random codes drawn from the URL-safe base64 alphabet; `candidates` yields a
//! bounded sequence of them, widening the code every few attempts. Uniqueness
//! is settled by the store's insert, not here.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use thiserror::Error;
use uuid::Uuid;

use crate::config::MAX_SLUG_LENGTH;

/// Names that would shadow a route.
pub const RESERVED_NAMES: [&str; 4] = ["paste", "url", "healthz", "readyz"];

const MAX_NAME_LEN: usize = 255;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_WIDEN_EVERY: u32 = 2;
const WIDEN_STEP: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("file name cannot be empty")]
    Empty,
    #[error("file name is longer than 255 bytes")]
    TooLong,
    #[error("file name `{0}` is reserved")]
    Reserved(String),
    #[error("file name `{0}` must not contain path separators or `..`")]
    PathTraversal(String),
    #[error("file name must not contain control characters")]
    ControlCharacter,
}

/// Produces a random code of the requested length.
pub type CodeGenerator = fn(usize) -> String;

#[derive(Debug, Clone)]
pub struct IdAllocator {
    base_length: usize,
    max_attempts: u32,
    widen_every: u32,
    generator: CodeGenerator,
}

impl IdAllocator {
    pub fn new(base_length: u8) -> Self {
        Self {
            base_length: usize::from(base_length.min(MAX_SLUG_LENGTH)),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            widen_every: DEFAULT_WIDEN_EVERY,
            generator: random_code,
        }
    }

    /// Swap the code source, e.g. for a deterministic one.
    pub fn with_generator(mut self, generator: CodeGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Validate a client-supplied file name and return it as the file's id.
    ///
    /// The name arrives percent-decoded. It is never rewritten, so equal
    /// names always map to the same id.
    pub fn allocate_file_id(&self, raw_name: &str) -> Result<String, IdError> {
        if raw_name.is_empty() {
            return Err(IdError::Empty);
        }
        if raw_name.len() > MAX_NAME_LEN {
            return Err(IdError::TooLong);
        }
        if raw_name.chars().any(char::is_control) {
            return Err(IdError::ControlCharacter);
        }
        if raw_name.contains(['/', '\\']) || raw_name == "." || raw_name.contains("..") {
            return Err(IdError::PathTraversal(raw_name.to_string()));
        }
        if RESERVED_NAMES.contains(&raw_name) {
            return Err(IdError::Reserved(raw_name.to_string()));
        }
        Ok(raw_name.to_string())
    }

    /// Candidate codes for a generated id, at most `max_attempts` of them.
    ///
    /// Starts at `max(base, requested)` characters and grows by two every
    /// `widen_every` attempts, capped at `MAX_SLUG_LENGTH`.
    pub fn candidates(&self, requested_length: Option<u8>) -> Candidates {
        let requested = usize::from(requested_length.unwrap_or(0).min(MAX_SLUG_LENGTH));
        Candidates {
            generator: self.generator,
            start_length: self.base_length.max(requested),
            widen_every: self.widen_every.max(1),
            attempt: 0,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug)]
pub struct Candidates {
    generator: CodeGenerator,
    start_length: usize,
    widen_every: u32,
    attempt: u32,
    max_attempts: u32,
}

impl Candidates {
    fn current_length(&self) -> usize {
        let widenings = (self.attempt / self.widen_every) as usize;
        (self.start_length + widenings * WIDEN_STEP).min(usize::from(MAX_SLUG_LENGTH))
    }
}

impl Iterator for Candidates {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.attempt < self.max_attempts {
            let code = (self.generator)(self.current_length());
            self.attempt += 1;
            if !RESERVED_NAMES.contains(&code.as_str()) {
                return Some(code);
            }
        }
        None
    }
}

/// A URL-safe random code backed by v4 UUID randomness.
pub fn random_code(length: usize) -> String {
    let mut code = String::with_capacity(length + 22);
    while code.len() < length {
        code.push_str(&URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()));
    }
    code.truncate(length);
    code
}
