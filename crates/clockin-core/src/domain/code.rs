//! Verification codes and the generator that produces them.
//!
//! A [`VerificationCode`] is a short numeric string (6 digits by default)
//! bound to one team and valid for a fixed window (30 seconds by default).
//!
//! # Why a string and not an integer?
//!
//! `"004217"` and `"4217"` are different codes to a human reading the manager
//! screen.  Storing the zero-padded string keeps the leading zeros that the
//! employee will actually type.
//!
//! # Randomness
//!
//! [`RandomCodeSource`] draws from the operating system RNG (`OsRng`), which
//! provides far more than the 32 bits of entropy per draw needed to make the
//! next code unpredictable from previous ones.  Tests swap in a
//! [`ScriptedCodeSource`] to get known values.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::OsRng;
use rand::Rng;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::team::TeamId;

/// Default number of digits in a code.
pub const DEFAULT_CODE_LENGTH: usize = 6;
/// Shortest supported code.
pub const MIN_CODE_LENGTH: usize = 4;
/// Longest supported code (`10^12` still fits comfortably in a `u64`).
pub const MAX_CODE_LENGTH: usize = 12;
/// Default validity window of a freshly issued code.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(30);

/// Errors raised when building a [`CodeGenerator`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("code length {0} is outside the supported range {MIN_CODE_LENGTH}..={MAX_CODE_LENGTH}")]
    InvalidLength(usize),

    #[error("validity duration must be greater than zero")]
    ZeroValidity,
}

// ── VerificationCode ──────────────────────────────────────────────────────────

/// A team's code together with its validity window.
///
/// `Debug` output redacts the digits so a stray `{:?}` in a log line never
/// leaks a live code.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationCode {
    team_id: TeamId,
    value: String,
    generation: u64,
    issued_at_ms: u64,
    expires_at_ms: u64,
}

impl VerificationCode {
    pub fn new(
        team_id: TeamId,
        value: String,
        generation: u64,
        issued_at_ms: u64,
        expires_at_ms: u64,
    ) -> Self {
        Self {
            team_id,
            value,
            generation,
            issued_at_ms,
            expires_at_ms,
        }
    }

    pub fn team_id(&self) -> &TeamId {
        &self.team_id
    }

    /// The digits shown on the manager screen.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Position of this code in its team's rotation history (1 = first).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn issued_at_ms(&self) -> u64 {
        self.issued_at_ms
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    /// A code is still valid at its exact expiry instant and expired one
    /// millisecond later.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }

    /// Compares `submitted` against the code in constant time.
    ///
    /// The length check short-circuits, which reveals only the code length
    /// (public anyway).  For equal lengths every byte is compared regardless of
    /// where the first difference is.
    pub fn matches(&self, submitted: &str) -> bool {
        let expected = self.value.as_bytes();
        let submitted = submitted.as_bytes();
        if expected.len() != submitted.len() {
            return false;
        }
        bool::from(expected.ct_eq(submitted))
    }
}

impl fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationCode")
            .field("team_id", &self.team_id)
            .field("value", &"<redacted>")
            .field("generation", &self.generation)
            .field("issued_at_ms", &self.issued_at_ms)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

// ── Code sources ──────────────────────────────────────────────────────────────

/// Produces the digit string for a new code.
pub trait CodeSource: Send + Sync {
    /// Returns exactly `length` ASCII digits.
    fn draw(&self, length: usize) -> String;
}

/// Uniform random digits from the operating system RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCodeSource;

impl CodeSource for RandomCodeSource {
    fn draw(&self, length: usize) -> String {
        let upper = 10u64.pow(length as u32);
        let n = OsRng.gen_range(0..upper);
        format!("{n:0length$}")
    }
}

/// Replays a fixed list of codes, then keeps returning the last one.
///
/// Intended for tests and demos that need to know which code will be issued.
///
/// ```rust
/// use clockin_core::{CodeSource, ScriptedCodeSource};
///
/// let source = ScriptedCodeSource::new(["482913", "000001"]);
/// assert_eq!(source.draw(6), "482913");
/// assert_eq!(source.draw(6), "000001");
/// assert_eq!(source.draw(6), "000001");
/// ```
#[derive(Debug)]
pub struct ScriptedCodeSource {
    queue: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedCodeSource {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(codes.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
        }
    }
}

impl CodeSource for ScriptedCodeSource {
    fn draw(&self, length: usize) -> String {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match next {
            Some(code) => {
                *last = Some(code.clone());
                code
            }
            None => last.clone().unwrap_or_else(|| "0".repeat(length)),
        }
    }
}

// ── CodeGenerator ─────────────────────────────────────────────────────────────

/// Issues [`VerificationCode`]s of a fixed length and validity.
#[derive(Clone)]
pub struct CodeGenerator {
    source: Arc<dyn CodeSource>,
    length: usize,
    validity: Duration,
}

impl CodeGenerator {
    /// Creates a generator backed by [`RandomCodeSource`].
    ///
    /// # Errors
    ///
    /// Returns [`CodeError`] if `length` is out of range or `validity` is zero.
    pub fn new(length: usize, validity: Duration) -> Result<Self, CodeError> {
        Self::with_source(Arc::new(RandomCodeSource), length, validity)
    }

    /// Creates a generator backed by a caller-supplied digit source.
    ///
    /// # Errors
    ///
    /// Same as [`CodeGenerator::new`].
    pub fn with_source(
        source: Arc<dyn CodeSource>,
        length: usize,
        validity: Duration,
    ) -> Result<Self, CodeError> {
        if !(MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
            return Err(CodeError::InvalidLength(length));
        }
        if validity.is_zero() {
            return Err(CodeError::ZeroValidity);
        }
        Ok(Self {
            source,
            length,
            validity,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Issues a new code for `team` valid from `now_ms` for one window.
    pub fn generate(&self, team: &TeamId, generation: u64, now_ms: u64) -> VerificationCode {
        let value = self.source.draw(self.length);
        debug_assert_eq!(value.len(), self.length, "code source returned wrong length");
        let expires_at_ms = now_ms.saturating_add(self.validity.as_millis() as u64);
        VerificationCode::new(team.clone(), value, generation, now_ms, expires_at_ms)
    }
}

impl fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGenerator")
            .field("length", &self.length)
            .field("validity", &self.validity)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
