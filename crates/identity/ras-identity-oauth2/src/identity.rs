//! Mapping from a token response to the identity handed to callers.

use ras_identity_core::{AuthMethod, PartialIdentity, TokenRecord};

/// Build the token-bearing identity shell. The profile stays unset.
pub fn assemble_identity(provider_id: &str, token: TokenRecord) -> PartialIdentity {
    PartialIdentity {
        provider_id: provider_id.to_string(),
        token,
        auth_method: AuthMethod::OAuth2,
        profile: None,
    }
}
