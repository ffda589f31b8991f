//! Response tokens pairing a reply with the receive that produced it

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token handed out by a receive
///
/// Exactly one respond may be issued per token. The token is deliberately
/// neither `Clone` nor `Copy` so that the type system enforces this.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseToken(u64);

impl ResponseToken {
    /// Creates a token from the substrate's raw value
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResponseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_raw_roundtrip() {
        let token = ResponseToken::from_raw(42);
        assert_eq!(token.as_raw(), 42);
        assert_eq!(format!("{}", token), "Token(42)");
    }

    #[test]
    fn test_token_equality() {
        assert_eq!(ResponseToken::from_raw(1), ResponseToken::from_raw(1));
        assert_ne!(ResponseToken::from_raw(1), ResponseToken::from_raw(2));
    }
}
