//! OANDA v3 personal access token

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("OANDA API token is empty")]
    Empty,

    #[error("OANDA API token contains whitespace")]
    Whitespace,
}

#[derive(Clone)]
pub struct OandaToken(String);

impl OandaToken {
    pub fn new(token: impl Into<String>) -> Result<Self, TokenError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(TokenError::Empty);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(TokenError::Whitespace);
        }
        Ok(Self(token))
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for OandaToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tail: String = self.0.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        write!(f, "OandaToken(****{})", tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_header() {
        let token = OandaToken::new("  abc-123  ").unwrap();
        assert_eq!(token.bearer(), "Bearer abc-123");
    }

    #[test]
    fn test_rejects_empty_and_spaced() {
        assert!(matches!(OandaToken::new(""), Err(TokenError::Empty)));
        assert!(matches!(OandaToken::new("ab cd"), Err(TokenError::Whitespace)));
    }

    #[test]
    fn test_debug_shows_only_tail() {
        let token = OandaToken::new("0123456789abcdef-secretpart-wxyz").unwrap();
        assert_eq!(format!("{:?}", token), "OandaToken(****wxyz)");
    }
}
