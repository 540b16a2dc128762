//! Common type definitions shared across the engine.
//!
//! # ID Types
//!
//! All entity IDs are UUIDs wrapped in type aliases:
//!
//! - [`UserId`]: owning user of a request
//! - [`ApiKeyId`]: stable identifier derived from an API key secret (the secret itself is never stored)
//! - [`RequestId`]: one audited request row
//! - [`GroupId`]: shared by all members of one compare call
//! - [`DecisionId`]: one routing decision
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging
//! - [`api_key_id`]: Derive the [`ApiKeyId`] for a bearer secret
//! - [`prompt_sha256`]: Hex digest stored alongside each prompt

use sha2::{Digest, Sha256};
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = Uuid;
pub type ApiKeyId = Uuid;
pub type RequestId = Uuid;
pub type GroupId = Uuid;
pub type DecisionId = Uuid;

/// Namespace for deriving API key ids, so the same secret always maps to the same id.
const API_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6a1c_2f0e_93b4_4d4b_9c7e_1b5f_0c2d_8e41);

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Derive the identifier for an API key secret.
pub fn api_key_id(secret: &str) -> ApiKeyId {
    let digest = Sha256::digest(secret.as_bytes());
    Uuid::new_v5(&API_KEY_NAMESPACE, digest.as_slice())
}

/// Lowercase hex SHA-256 of the prompt text.
pub fn prompt_sha256(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }

    #[test]
    fn test_api_key_id_is_stable_per_secret() {
        assert_eq!(api_key_id("sk-one"), api_key_id("sk-one"));
        assert_ne!(api_key_id("sk-one"), api_key_id("sk-two"));
    }

    #[test]
    fn test_prompt_sha256_known_value() {
        assert_eq!(
            prompt_sha256("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
