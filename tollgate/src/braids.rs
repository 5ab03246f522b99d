use std::fmt;

use aliri_braid::braid;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most `f.width()` (or `default_len`) characters of a secret
pub(crate) fn limited_reveal(
    unprotected: &str,
    f: &mut fmt::Formatter,
    default_len: usize,
) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// A signed, short-lived access token
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A signed, long-lived, single-use refresh token
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// A per-issuance nonce shared by an access/refresh token pair
#[braid(serde)]
pub struct Nonce;

const NONCE_BYTES: usize = 16;

impl Nonce {
    /// Generates a fresh random nonce using the system CSPRNG
    ///
    /// # Errors
    ///
    /// The system random number generator failed.
    pub fn generate() -> Result<Self, error::Unexpected> {
        Self::generate_with_rng(&SystemRandom::new())
    }

    /// Generates a fresh random nonce using the provided source of randomness
    ///
    /// # Errors
    ///
    /// The provided random number generator failed.
    pub fn generate_with_rng(rng: &dyn SecureRandom) -> Result<Self, error::Unexpected> {
        let mut bytes = [0u8; NONCE_BYTES];
        rng.fill(&mut bytes)
            .map_err(|_| error::unexpected("random number generator failure"))?;
        Ok(Self::new(URL_SAFE_NO_PAD.encode(bytes)))
    }
}
