use crate::config;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use base64::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD, decode_config, encode_config};
use jwt_simple::algorithms::MACLike;
use jwt_simple::prelude::{
    Claims, Duration as JwtDuration, HS256Key, NoCustomClaims, VerificationOptions,
};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

pub(crate) const USERS_FILE: &str = "users.toml";

/// A signed-in identity as the rest of the application sees it.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// One entry of the `users.toml` registry at the content root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UserRecord {
    pub(crate) uid: String,
    pub(crate) name: String,
    pub(crate) display_name: String,
    pub(crate) email: String,
    #[serde(default)]
    pub(crate) photo_url: Option<String>,
    pub(crate) password_hash: String,
}

impl UserRecord {
    pub(crate) fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct UserRegistry {
    #[serde(default)]
    pub(crate) users: Vec<UserRecord>,
}

impl UserRegistry {
    pub(crate) fn by_name(&self, name: &str) -> Option<&UserRecord> {
        self.users.iter().find(|user| user.name == name)
    }

    pub(crate) fn by_uid(&self, uid: &str) -> Option<&UserRecord> {
        self.users.iter().find(|user| user.uid == uid)
    }
}

pub(crate) fn load_users(root: &Path) -> Result<UserRegistry, String> {
    let path = root.join(USERS_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(UserRegistry::default()),
        Err(err) => return Err(format!("failed to read {USERS_FILE}: {err}")),
    };
    toml::from_str(&contents).map_err(|err| format!("failed to parse {USERS_FILE}: {err}"))
}

/// Administrator gate: a plain membership test over the configured allow-list.
/// Not a security boundary; the content root's own access rules are.
pub(crate) fn is_admin(identity: &Identity, admin_emails: &[String]) -> bool {
    admin_emails
        .iter()
        .any(|email| email.eq_ignore_ascii_case(&identity.email))
}

#[derive(Debug, Clone)]
pub(crate) struct AuthState {
    key: HS256Key,
    issuer: String,
    cookie_name: String,
    token_ttl: time::Duration,
    cookie_secure: bool,
}

#[derive(Debug)]
pub enum AuthError {
    InvalidKey,
    InvalidToken,
    MissingExpiry,
    MissingSubject,
    HashFailure,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidKey => f.write_str("invalid auth key"),
            AuthError::InvalidToken => f.write_str("invalid auth token"),
            AuthError::MissingExpiry => f.write_str("auth token missing expiry"),
            AuthError::MissingSubject => f.write_str("auth token missing subject"),
            AuthError::HashFailure => f.write_str("failed to hash password"),
        }
    }
}

impl AuthState {
    pub(crate) fn from_config(config: &config::AppConfig) -> Result<Option<Self>, AuthError> {
        let Some(auth) = config.auth.as_ref() else {
            return Ok(None);
        };

        let key_bytes = decode_key(&auth.key)?;
        let key = HS256Key::from_bytes(&key_bytes);

        Ok(Some(Self {
            key,
            issuer: config.app_name.clone(),
            cookie_name: auth.cookie_name.clone(),
            token_ttl: auth.token_ttl,
            cookie_secure: auth.cookie_secure,
        }))
    }

    pub(crate) fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Issues a session token whose subject is the user's uid.
    pub(crate) fn issue_token(&self, uid: &str) -> Result<String, AuthError> {
        let ttl_seconds = self.token_ttl.whole_seconds();
        if ttl_seconds <= 0 {
            return Err(AuthError::InvalidToken);
        }
        let claims = Claims::create(JwtDuration::from_secs(ttl_seconds as u64))
            .with_subject(uid)
            .with_issuer(&self.issuer);
        self.key
            .authenticate(claims)
            .map_err(|_| AuthError::InvalidToken)
    }

    pub(crate) fn auth_cookie(&self, token: &str) -> String {
        let max_age = self.token_ttl.whole_seconds().max(0);
        let mut cookie = format!(
            "{}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.cookie_name
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    pub(crate) fn clear_cookie(&self) -> String {
        let mut cookie = format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Verifies a session token and returns the uid it was issued for.
    pub(crate) fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        let mut options = VerificationOptions::default();
        let mut issuers = HashSet::new();
        issuers.insert(self.issuer.clone());
        options.allowed_issuers = Some(issuers);

        let claims = self
            .key
            .verify_token::<NoCustomClaims>(token, Some(options))
            .map_err(|_| AuthError::InvalidToken)?;

        if claims.expires_at.is_none() {
            return Err(AuthError::MissingExpiry);
        }

        let subject = claims.subject.ok_or(AuthError::MissingSubject)?;
        if subject.trim().is_empty() {
            return Err(AuthError::MissingSubject);
        }

        Ok(subject)
    }
}

pub(crate) fn verify_password(password: &str, password_hash: &str) -> bool {
    let hash = match PasswordHash::new(password_hash) {
        Ok(hash) => hash,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &hash)
        .is_ok()
}

/// Produces an argon2 hash suitable for a `users.toml` entry.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut SaltRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::HashFailure)
}

fn decode_key(raw: &str) -> Result<Vec<u8>, AuthError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AuthError::InvalidKey);
    }

    let decoded = decode_config(trimmed, URL_SAFE_NO_PAD)
        .or_else(|_| decode_config(trimmed, STANDARD))
        .or_else(|_| decode_config(trimmed, STANDARD_NO_PAD))
        .map_err(|_| AuthError::InvalidKey)?;

    if decoded.is_empty() {
        return Err(AuthError::InvalidKey);
    }

    Ok(decoded)
}

pub fn generate_auth_key() -> Result<String, AuthError> {
    let mut rng = OsRng;
    generate_auth_key_with_rng(&mut rng)
}

pub(crate) fn generate_auth_key_with_rng<R: RngCore + CryptoRng>(
    rng: &mut R,
) -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    let encoded = encode_config(bytes, URL_SAFE_NO_PAD);
    if encoded.is_empty() {
        return Err(AuthError::InvalidKey);
    }
    Ok(encoded)
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::store::tests::create_temp_root;

    struct ZeroRng;

    impl RngCore for ZeroRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            for value in dest.iter_mut() {
                *value = 0;
            }
        }

        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    impl CryptoRng for ZeroRng {}

    fn identity(email: &str) -> Identity {
        Identity {
            uid: "u-test".to_string(),
            display_name: "Test".to_string(),
            email: email.to_string(),
            photo_url: None,
        }
    }

    #[test]
    fn generate_auth_key_with_rng__should_match_fixture() {
        // Given
        let mut rng = ZeroRng;

        // When
        let key = generate_auth_key_with_rng(&mut rng).expect("auth key");

        // Then
        assert_eq!(key, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn hash_password__should_produce_a_verifiable_hash() {
        // When
        let hash = hash_password("secret").expect("hash password");

        // Then
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn issue_token__should_round_trip_the_uid() {
        // Given
        let config = config::AppConfig {
            auth: Some(config::AuthConfig {
                key: encode_config(b"round-trip-secret", URL_SAFE_NO_PAD),
                token_ttl: time::Duration::hours(1),
                cookie_name: "daydrop_auth".to_string(),
                cookie_secure: false,
            }),
            ..Default::default()
        };
        let auth = AuthState::from_config(&config)
            .expect("auth state")
            .expect("auth enabled");

        // When
        let token = auth.issue_token("u-mika").expect("issue token");
        let subject = auth.verify_token(&token).expect("verify token");

        // Then
        assert_eq!(subject, "u-mika");
    }

    #[test]
    fn is_admin__should_match_case_insensitively() {
        // Given
        let admins = vec!["admin@example.com".to_string()];

        // Then
        assert!(is_admin(&identity("Admin@Example.com"), &admins));
        assert!(!is_admin(&identity("viewer@example.com"), &admins));
        assert!(!is_admin(&identity("admin@example.com"), &[]));
    }

    #[test]
    fn load_users__should_parse_the_registry_file() {
        // Given
        let root = create_temp_root("auth-users");
        let contents = r#"[[users]]
uid = "u-mika"
name = "mika"
display_name = "Mika"
email = "mika@example.com"
password_hash = "hash"
"#;
        std::fs::write(root.join(USERS_FILE), contents).expect("write users.toml");

        // When
        let registry = load_users(&root).expect("load users");

        // Then
        assert_eq!(registry.users.len(), 1);
        let user = registry.by_name("mika").expect("user by name");
        assert_eq!(user.email, "mika@example.com");
        assert!(registry.by_uid("u-mika").is_some());
        assert!(registry.by_uid("u-unknown").is_none());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn load_users__should_default_to_empty_when_missing() {
        // Given
        let root = create_temp_root("auth-users-missing");

        // When
        let registry = load_users(&root).expect("load users");

        // Then
        assert!(registry.users.is_empty());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
