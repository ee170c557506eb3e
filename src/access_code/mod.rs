//! Time-boxed access codes.
//!
//! A code is a short random fragment followed by a fixed-width base-36 field
//! holding the expiry as minutes since an anchor epoch, e.g. `1l9010`. A code
//! is only accepted when the hex digest of the whole string ends with the
//! proof tag, so mistyped or made-up strings fail with high probability.
//! Generation searches random fragments until one produces the tag.
//!
//! The tag is a typo filter, not an authorization boundary: anyone who knows
//! the scheme can produce a passing code offline.

mod base36;
mod digest;

pub use digest::{DigestHex, Sha256Hex};

use rand::Rng;

const MINUTE_MS: i64 = 60_000;

/// Errors raised while building a codec or generating a code.
///
/// Validation never errors; see [`AccessCodeCodec::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessCodeError {
    #[error("no code ending in `{tag}` found within {attempts} attempts")]
    GenerationExhausted { tag: String, attempts: u32 },

    #[error("validity window must be at least one minute, got {0} ms")]
    InvalidWindow(i64),

    #[error("expiry of {minutes} minutes past the anchor does not fit a {width}-digit field")]
    ExpiryOutOfRange { minutes: i64, width: usize },

    #[error("invalid access code scheme: {0}")]
    InvalidScheme(String),
}

/// Shape of the codes a codec produces and accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCodeScheme {
    /// Required suffix of the hex digest
    pub tag: String,
    /// Length of the random prefix
    pub fragment_len: usize,
    /// Width of the base-36 expiry field
    pub field_width: usize,
    /// Upper bound on random fragments tried by `generate`.
    ///
    /// When the fragment space (`36^fragment_len`) is no larger than this,
    /// `generate` also stops as soon as every fragment has been drawn. With
    /// the default two-character fragment and two-character tag, roughly
    /// 0.6% of expiry minutes have no passing fragment at all and fail with
    /// `GenerationExhausted`; a longer fragment makes that negligible.
    pub max_attempts: u32,
}

impl Default for AccessCodeScheme {
    fn default() -> Self {
        Self {
            tag: "a1".to_string(),
            fragment_len: 2,
            field_width: 4,
            max_attempts: 100_000,
        }
    }
}

impl AccessCodeScheme {
    /// Total length of a generated code.
    pub fn code_len(&self) -> usize {
        self.fragment_len + self.field_width
    }

    fn check(&self) -> Result<(), AccessCodeError> {
        if self.tag.is_empty() {
            return Err(AccessCodeError::InvalidScheme("tag is empty".into()));
        }
        if !self
            .tag
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(AccessCodeError::InvalidScheme(format!(
                "tag `{}` is not lowercase hex",
                self.tag
            )));
        }
        if self.fragment_len == 0 {
            return Err(AccessCodeError::InvalidScheme(
                "fragment length must be positive".into(),
            ));
        }
        if self.field_width == 0 {
            return Err(AccessCodeError::InvalidScheme(
                "field width must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(AccessCodeError::InvalidScheme(
                "attempt budget must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Generates and validates access codes for one scheme and hash function.
#[derive(Debug, Clone)]
pub struct AccessCodeCodec<H = Sha256Hex> {
    scheme: AccessCodeScheme,
    hasher: H,
}

impl Default for AccessCodeCodec {
    fn default() -> Self {
        Self {
            scheme: AccessCodeScheme::default(),
            hasher: Sha256Hex,
        }
    }
}

impl AccessCodeCodec {
    /// Codec hashing with SHA-256.
    pub fn new(scheme: AccessCodeScheme) -> Result<Self, AccessCodeError> {
        Self::with_hasher(scheme, Sha256Hex)
    }
}

impl<H: DigestHex> AccessCodeCodec<H> {
    pub fn with_hasher(scheme: AccessCodeScheme, hasher: H) -> Result<Self, AccessCodeError> {
        scheme.check()?;
        Ok(Self { scheme, hasher })
    }

    pub fn scheme(&self) -> &AccessCodeScheme {
        &self.scheme
    }

    /// Whether the digest of `token` ends with the proof tag.
    pub fn has_proof_tag(&self, token: &str) -> bool {
        self.hasher.digest_hex(token).ends_with(&self.scheme.tag)
    }

    /// Expiry instant encoded in `token`, ignoring the proof tag.
    ///
    /// `None` when the field is missing, not base-36, or overflows.
    pub fn expiry_ms(&self, token: &str, anchor_ms: i64) -> Option<i64> {
        let start = self.scheme.fragment_len;
        let field = token.get(start..start + self.scheme.field_width)?;
        let minutes = i64::try_from(base36::decode(field)?).ok()?;
        minutes.checked_mul(MINUTE_MS)?.checked_add(anchor_ms)
    }

    /// Produce a code valid from `now_ms` until roughly `now_ms + window_ms`,
    /// rounded down to the minute.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        anchor_ms: i64,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<String, AccessCodeError> {
        // Floor rounding could leave a sub-minute window already expired.
        if window_ms < MINUTE_MS {
            return Err(AccessCodeError::InvalidWindow(window_ms));
        }

        let width = self.scheme.field_width;
        let minutes = now_ms
            .saturating_add(window_ms)
            .saturating_sub(anchor_ms)
            .div_euclid(MINUTE_MS);
        let field = u64::try_from(minutes)
            .ok()
            .and_then(|m| base36::encode_fixed(m, width))
            .ok_or(AccessCodeError::ExpiryOutOfRange { minutes, width })?;

        // Track drawn fragments when the whole space fits in the budget, so a
        // minute with no passing fragment fails fast.
        let space = u32::try_from(self.scheme.fragment_len)
            .ok()
            .and_then(|len| base36::ALPHABET.len().checked_pow(len))
            .filter(|space| *space <= self.scheme.max_attempts as usize);
        let mut drawn = space.map(|space| vec![false; space]);
        let mut distinct = 0usize;

        let mut candidate = String::with_capacity(self.scheme.code_len());
        let mut attempts = 0;
        while attempts < self.scheme.max_attempts {
            attempts += 1;
            candidate.clear();
            let mut index = 0usize;
            for _ in 0..self.scheme.fragment_len {
                let digit = rng.random_range(0..base36::ALPHABET.len());
                index = index.wrapping_mul(base36::ALPHABET.len()).wrapping_add(digit);
                candidate.push(base36::ALPHABET[digit] as char);
            }
            candidate.push_str(&field);

            if self.has_proof_tag(&candidate) {
                tracing::debug!(attempts, expiry_minutes = minutes, "generated access code");
                return Ok(candidate);
            }

            if let Some(drawn) = drawn.as_mut() {
                if !drawn[index] {
                    drawn[index] = true;
                    distinct += 1;
                    if distinct == drawn.len() {
                        break;
                    }
                }
            }
        }

        tracing::warn!(
            attempts,
            expiry_minutes = minutes,
            tag = %self.scheme.tag,
            "access code search exhausted"
        );
        Err(AccessCodeError::GenerationExhausted {
            tag: self.scheme.tag.clone(),
            attempts,
        })
    }

    /// Whether `token` carries the proof tag and has not yet expired at
    /// `now_ms`. Total over every input string.
    pub fn validate(&self, token: &str, anchor_ms: i64, now_ms: i64) -> bool {
        if !self.has_proof_tag(token) {
            return false;
        }
        match self.expiry_ms(token, anchor_ms) {
            Some(expiry) => now_ms < expiry,
            None => false,
        }
    }

    /// [`generate`](Self::generate) with the thread RNG and the wall clock.
    pub fn generate_now(&self, anchor_ms: i64, window_ms: i64) -> Result<String, AccessCodeError> {
        self.generate(&mut rand::rng(), anchor_ms, window_ms, now_ms())
    }

    /// [`validate`](Self::validate) against the wall clock.
    pub fn validate_now(&self, token: &str, anchor_ms: i64) -> bool {
        self.validate(token, anchor_ms, now_ms())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // 2026-01-01T00:00:00Z
    const ANCHOR: i64 = 1_767_225_600_000;
    // 2026-10-19T12:00:00Z
    const NOW: i64 = 1_792_411_200_000;
    const THREE_HOURS: i64 = 3 * 3600 * 1000;
    const TEN_YEARS: i64 = 10 * 365 * 24 * 3600 * 1000;

    /// Every input passes the tag check, isolating the expiry logic.
    struct TagAlways;

    impl DigestHex for TagAlways {
        fn digest_hex(&self, _input: &str) -> String {
            "00a1".to_string()
        }
    }

    /// No input passes the tag check.
    struct TagNever;

    impl DigestHex for TagNever {
        fn digest_hex(&self, _input: &str) -> String {
            "00ff".to_string()
        }
    }

    fn sha256_codec() -> AccessCodeCodec {
        AccessCodeCodec::default()
    }

    fn small_budget() -> AccessCodeScheme {
        AccessCodeScheme {
            max_attempts: 50,
            ..AccessCodeScheme::default()
        }
    }

    #[test]
    fn test_three_hour_code_round_trip() {
        let codec = sha256_codec();
        let mut rng = StdRng::seed_from_u64(42);

        let code = codec.generate(&mut rng, ANCHOR, THREE_HOURS, NOW).unwrap();

        assert_eq!(code.len(), 6);
        assert_eq!(&code[2..], "9010");
        assert!(codec.has_proof_tag(&code));
        assert!(codec.validate(&code, ANCHOR, NOW));
        assert!(codec.validate(&code, ANCHOR, NOW + THREE_HOURS - 1));
        assert!(!codec.validate(&code, ANCHOR, NOW + THREE_HOURS));
        assert!(!codec.validate(&code, ANCHOR, ANCHOR + TEN_YEARS));
    }

    #[test]
    fn test_known_sha256_code() {
        let codec = sha256_codec();
        // sha256("1l9010") ends in "a1"; expiry is 2026-10-19T15:00:00Z
        assert_eq!(codec.expiry_ms("1l9010", ANCHOR), Some(NOW + THREE_HOURS));
        assert!(codec.validate("1l9010", ANCHOR, NOW));
        assert!(!codec.validate("1l9010", ANCHOR, NOW + THREE_HOURS));
    }

    #[test]
    fn test_tag_is_enforced_regardless_of_expiry() {
        let codec = sha256_codec();
        // Same expiry field as a valid code, but sha256 ends in "23" / "34"
        for code in ["009010", "019010"] {
            assert_eq!(codec.expiry_ms(code, ANCHOR), Some(NOW + THREE_HOURS));
            assert!(!codec.validate(code, ANCHOR, ANCHOR));
        }

        let never = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagNever).unwrap();
        assert!(!never.validate("1l9010", ANCHOR, ANCHOR));
    }

    #[test]
    fn test_same_seed_same_code() {
        let codec = sha256_codec();
        let a = codec
            .generate(&mut StdRng::seed_from_u64(7), ANCHOR, THREE_HOURS, NOW)
            .unwrap();
        let b = codec
            .generate(&mut StdRng::seed_from_u64(7), ANCHOR, THREE_HOURS, NOW)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_expiry_field_is_zero_padded() {
        let codec = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagAlways).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let code = codec.generate(&mut rng, ANCHOR, THREE_HOURS, ANCHOR).unwrap();
        assert_eq!(code.len(), 6);
        assert_eq!(&code[2..], "0050");
        assert_eq!(codec.expiry_ms(&code, ANCHOR), Some(ANCHOR + THREE_HOURS));
    }

    #[test]
    fn test_minute_granularity() {
        let codec = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagAlways).unwrap();
        let mut rng = StdRng::seed_from_u64(3);

        // 90 s past the anchor plus a one minute window floors to minute 2
        let code = codec
            .generate(&mut rng, ANCHOR, 60_000, ANCHOR + 90_000)
            .unwrap();
        assert_eq!(&code[2..], "0002");
        assert!(codec.validate(&code, ANCHOR, ANCHOR + 119_999));
        assert!(!codec.validate(&code, ANCHOR, ANCHOR + 120_000));
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let codec = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagAlways).unwrap();
        assert!(codec.validate("zz0001", ANCHOR, ANCHOR + 59_999));
        assert!(!codec.validate("zz0001", ANCHOR, ANCHOR + 60_000));
        assert!(!codec.validate("zz0000", ANCHOR, ANCHOR));
    }

    #[test]
    fn test_exhaustion_is_reported() {
        let codec = AccessCodeCodec::with_hasher(small_budget(), TagNever).unwrap();
        let err = codec
            .generate(&mut StdRng::seed_from_u64(9), ANCHOR, THREE_HOURS, NOW)
            .unwrap_err();
        assert_eq!(
            err,
            AccessCodeError::GenerationExhausted {
                tag: "a1".to_string(),
                attempts: 50,
            }
        );
    }

    #[test]
    fn test_exhaustion_stops_once_every_fragment_is_drawn() {
        let codec = AccessCodeCodec::with_hasher(
            AccessCodeScheme {
                fragment_len: 1,
                ..AccessCodeScheme::default()
            },
            TagNever,
        )
        .unwrap();

        let err = codec
            .generate(&mut StdRng::seed_from_u64(11), ANCHOR, THREE_HOURS, NOW)
            .unwrap_err();
        match err {
            AccessCodeError::GenerationExhausted { attempts, .. } => {
                assert!(attempts >= 36, "stopped after {attempts}");
                assert!(attempts < 100_000, "used the whole budget");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unfindable_minute_fails_fast_with_sha256() {
        // sha256 of every `xx` + "000t" (minute 29) misses the "a1" tag
        let codec = sha256_codec();
        let now = ANCHOR + 29 * 60_000 - THREE_HOURS;

        let err = codec
            .generate(&mut StdRng::seed_from_u64(5), ANCHOR, THREE_HOURS, now)
            .unwrap_err();
        match err {
            AccessCodeError::GenerationExhausted { attempts, .. } => {
                assert!(attempts >= 1296);
                assert!(attempts < 100_000);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_window_below_a_minute_is_rejected() {
        let codec = sha256_codec();
        let mut rng = StdRng::seed_from_u64(0);
        for window in [0, -1, 59_999] {
            assert_eq!(
                codec.generate(&mut rng, ANCHOR, window, NOW),
                Err(AccessCodeError::InvalidWindow(window))
            );
        }
    }

    #[test]
    fn test_expiry_outside_field_is_rejected() {
        let codec = sha256_codec();
        let mut rng = StdRng::seed_from_u64(0);

        // Anchor after the expiry
        let err = codec
            .generate(&mut rng, NOW + TEN_YEARS, THREE_HOURS, NOW)
            .unwrap_err();
        assert!(matches!(err, AccessCodeError::ExpiryOutOfRange { width: 4, .. }));

        // Four base-36 digits cover a bit over three years of minutes
        let err = codec
            .generate(&mut rng, ANCHOR - TEN_YEARS, THREE_HOURS, NOW)
            .unwrap_err();
        assert!(matches!(err, AccessCodeError::ExpiryOutOfRange { width: 4, .. }));

        let err = codec
            .generate(&mut rng, i64::MIN, THREE_HOURS, i64::MAX)
            .unwrap_err();
        assert!(matches!(err, AccessCodeError::ExpiryOutOfRange { .. }));
    }

    #[test]
    fn test_malformed_tokens_are_invalid() {
        let codec = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagAlways).unwrap();
        let inputs = [
            "",
            "short",
            "ab",
            "ab+zzz",
            "ab-1zz",
            "ab zz1",
            "ab_zzz",
            "aé0001",
            "\u{0}\u{0}\u{0}\u{0}\u{0}\u{0}",
            "🎉🎉🎉",
        ];
        for input in inputs {
            assert!(!codec.validate(input, ANCHOR, ANCHOR), "{input:?} passed");
        }
        assert!(!codec.validate("zzzzzzzzzzzzzzzzzzzzzzzz", i64::MAX, i64::MIN));
    }

    #[test]
    fn test_random_garbage_never_panics() {
        let sha = sha256_codec();
        let tagged = AccessCodeCodec::with_hasher(AccessCodeScheme::default(), TagAlways).unwrap();
        let mut rng = StdRng::seed_from_u64(2026);

        for _ in 0..500 {
            let len = rng.random_range(0..16);
            let garbage: String = (0..len)
                .map(|_| {
                    if rng.random_bool(0.8) {
                        rng.random_range(' '..='~')
                    } else {
                        rng.random_range('\u{a0}'..='\u{2fff}')
                    }
                })
                .collect();

            // Four base-36 digits cannot reach ten years past the anchor
            assert!(!sha.validate(&garbage, ANCHOR, ANCHOR + TEN_YEARS));
            assert!(!tagged.validate(&garbage, ANCHOR, ANCHOR + TEN_YEARS));
            let _ = sha.validate(&garbage, ANCHOR, ANCHOR);
        }
    }

    #[test]
    fn test_wall_clock_round_trip() {
        // A third fragment character makes exhaustion practically impossible
        let codec = AccessCodeCodec::new(AccessCodeScheme {
            fragment_len: 3,
            ..AccessCodeScheme::default()
        })
        .unwrap();
        let anchor = now_ms() - 24 * 3600 * 1000;

        let code = codec.generate_now(anchor, THREE_HOURS).unwrap();
        assert_eq!(code.len(), 7);
        assert!(codec.validate_now(&code, anchor));
        assert!(!codec.validate(&code, anchor, now_ms() + THREE_HOURS));
    }

    #[test]
    fn test_scheme_validation() {
        let bad = [
            AccessCodeScheme {
                tag: String::new(),
                ..AccessCodeScheme::default()
            },
            AccessCodeScheme {
                tag: "A1".to_string(),
                ..AccessCodeScheme::default()
            },
            AccessCodeScheme {
                tag: "zz".to_string(),
                ..AccessCodeScheme::default()
            },
            AccessCodeScheme {
                fragment_len: 0,
                ..AccessCodeScheme::default()
            },
            AccessCodeScheme {
                field_width: 0,
                ..AccessCodeScheme::default()
            },
            AccessCodeScheme {
                max_attempts: 0,
                ..AccessCodeScheme::default()
            },
        ];
        for scheme in bad {
            assert!(matches!(
                AccessCodeCodec::new(scheme),
                Err(AccessCodeError::InvalidScheme(_))
            ));
        }
        assert_eq!(AccessCodeScheme::default().code_len(), 6);
    }
}
