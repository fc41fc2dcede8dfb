//! Caller identity.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, Result, RouterError};

/// Identity claims of the caller, resolved by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Organization the caller acts for.
    pub org_id: String,
    /// Caller email, recorded as author of changes.
    pub email: String,
    /// Caller user id.
    pub user_id: String,
}

impl Claims {
    /// Creates claims.
    pub fn new(org_id: impl Into<String>, email: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            email: email.into(),
            user_id: user_id.into(),
        }
    }

    /// Returns the claims, failing when the request carried none.
    pub fn require(claims: Option<&Self>) -> Result<&Self> {
        match claims {
            Some(claims) if !claims.org_id.is_empty() => Ok(claims),
            Some(_) => Err(RouterError::invalid_input(
                ErrorCode::UNAUTHENTICATED,
                "invalid claims: missing org id",
            )),
            None => Err(RouterError::invalid_input(
                ErrorCode::UNAUTHENTICATED,
                "invalid claims: no claims in request",
            )),
        }
    }
}
