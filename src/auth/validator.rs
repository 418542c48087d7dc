//! Credential validator
//!
//! Input checks applied to a `username:password` line before the account
//! store is consulted.

use crate::error::AuthError;

/// Longest username or password accepted.
pub const MAX_CREDENTIAL_LENGTH: usize = 64;

/// Performs basic input sanitation to check for malicious or malformed input.
fn is_valid_input(input: &str) -> bool {
    !input.is_empty()
        && input.len() <= MAX_CREDENTIAL_LENGTH
        && !input.contains(['\r', '\n', '\0'])
}

/// Validates the shape of a credential pair.
///
/// Usernames may not contain whitespace or `:` since they prefix every chat
/// line and are the key of the account file.
pub fn validate_credentials(username: &str, password: &str) -> Result<(), AuthError> {
    if !is_valid_input(username)
        || username.contains(char::is_whitespace)
        || username.contains(':')
    {
        return Err(AuthError::MalformedCredentials);
    }

    if !is_valid_input(password) {
        return Err(AuthError::MalformedCredentials);
    }

    Ok(())
}
