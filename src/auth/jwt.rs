use crate::db::models::user::{ROLE_ADMIN, UserInfo};
use auth_sessions_api::{Jwk, JwkSet};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    GenerationFailed(jsonwebtoken::errors::Error),
    #[error("Token verification failed: {0}")]
    VerificationFailed(String),
    #[error("Token expired")]
    Expired,
    #[error("Unexpected token type: {0:?}")]
    WrongTokenType(TokenType),
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),
    #[error("Invalid key material: {0}")]
    KeyMaterial(String),
    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: Uuid,
    pub role: String,
    pub tier: String,
    pub token_version: i32,
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

impl Claims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether the role claim is one of `roles`. An empty role never matches.
    pub fn has_role(&self, roles: &[&str]) -> bool {
        !self.role.is_empty() && roles.contains(&self.role.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(&[ROLE_ADMIN])
    }
}

#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub claims: Claims,
}

struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    public_pem: String,
}

struct VerificationKey {
    decoding_key: DecodingKey,
    jwk: Jwk,
}

/// One active signing key plus every public key still accepted for
/// verification. Retired keys stay here until tokens signed with them expire.
pub struct KeyRing {
    signing: SigningKey,
    verification: BTreeMap<String, VerificationKey>,
}

impl KeyRing {
    /// Builds a ring from a PKCS#8 P-256 private key.
    pub fn from_pem(private_pem: &str) -> Result<Self, JwtError> {
        let secret = SecretKey::from_pkcs8_pem(private_pem)
            .map_err(|e| JwtError::KeyMaterial(format!("private key: {e}")))?;
        let public = secret.public_key();
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyMaterial(format!("public key: {e}")))?;
        let kid = key_id(&public);
        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::KeyMaterial(format!("private key: {e}")))?;

        let mut ring = Self {
            signing: SigningKey {
                kid,
                encoding_key,
                public_pem: public_pem.clone(),
            },
            verification: BTreeMap::new(),
        };
        ring.add_verification_key(&public, &public_pem)?;
        Ok(ring)
    }

    /// Adds a public key accepted for verification only.
    pub fn with_verification_key(mut self, public_pem: &str) -> Result<Self, JwtError> {
        let public = PublicKey::from_public_key_pem(public_pem)
            .map_err(|e| JwtError::KeyMaterial(format!("public key: {e}")))?;
        self.add_verification_key(&public, public_pem)?;
        Ok(self)
    }

    /// Fresh in-memory ring. Tokens it signs die with the process.
    pub fn generate() -> Result<Self, JwtError> {
        let secret = SecretKey::random(&mut OsRng);
        let pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::KeyMaterial(e.to_string()))?;
        Self::from_pem(&pem)
    }

    /// Loads the active private key and every `*.pem` under `public_keys_dir`.
    pub fn load(private_key_path: &Path, public_keys_dir: &Path) -> Result<Self, JwtError> {
        let private_pem = fs::read_to_string(private_key_path).map_err(|e| {
            JwtError::KeyMaterial(format!(
                "cannot read {} ({e}); run `auth-sessions keygen` first",
                private_key_path.display()
            ))
        })?;
        let mut ring = Self::from_pem(&private_pem)?;

        if !public_keys_dir.is_dir() {
            warn!(
                "Public key directory {} not found, verifying with the active key only",
                public_keys_dir.display()
            );
            return Ok(ring);
        }

        for entry in fs::read_dir(public_keys_dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "pem") {
                continue;
            }
            let pem = fs::read_to_string(&path)?;
            ring = ring
                .with_verification_key(&pem)
                .map_err(|e| JwtError::KeyMaterial(format!("{}: {e}", path.display())))?;
        }

        info!(
            active_kid = %ring.active_kid(),
            verification_keys = ring.verification.len(),
            "Signing keys loaded"
        );
        Ok(ring)
    }

    pub fn active_kid(&self) -> &str {
        &self.signing.kid
    }

    pub fn active_public_pem(&self) -> &str {
        &self.signing.public_pem
    }

    /// Active key first, then the retired ones.
    pub fn jwks(&self) -> JwkSet {
        let mut keys: Vec<Jwk> = self.verification.values().map(|k| k.jwk.clone()).collect();
        keys.sort_by_key(|k| k.kid != self.signing.kid);
        JwkSet { keys }
    }

    fn decoding_key(&self, kid: &str) -> Option<&DecodingKey> {
        self.verification.get(kid).map(|k| &k.decoding_key)
    }

    fn add_verification_key(&mut self, public: &PublicKey, public_pem: &str) -> Result<(), JwtError> {
        let kid = key_id(public);
        if self.verification.contains_key(&kid) {
            return Ok(());
        }
        let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::KeyMaterial(format!("public key: {e}")))?;
        let jwk = public_jwk(public, &kid)?;
        debug!(%kid, "Verification key registered");
        self.verification.insert(kid, VerificationKey { decoding_key, jwk });
        Ok(())
    }
}

/// First 16 hex chars of SHA-256 over the uncompressed SEC1 point: every
/// process loading the same key derives the same id.
fn key_id(public: &PublicKey) -> String {
    let point = public.to_encoded_point(false);
    let digest = hex::encode(Sha256::digest(point.as_bytes()));
    digest[..16].to_string()
}

fn public_jwk(public: &PublicKey, kid: &str) -> Result<Jwk, JwtError> {
    let point = public.to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(JwtError::KeyMaterial("public key is the identity point".to_string()));
    };
    Ok(Jwk {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        alg: "ES256".to_string(),
        key_use: "sig".to_string(),
        kid: kid.to_string(),
        x: URL_SAFE_NO_PAD.encode(x),
        y: URL_SAFE_NO_PAD.encode(y),
    })
}

/// Writes a new P-256 key pair: the private key replaces `private_key_path`
/// (mode 0600) and the public key lands in `public_keys_dir/<kid>.pem`
/// (mode 0644) next to the keys it retires. Returns the new kid.
pub fn generate_key_pair(private_key_path: &Path, public_keys_dir: &Path) -> Result<String, JwtError> {
    let secret = SecretKey::random(&mut OsRng);
    let private_pem = secret
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| JwtError::KeyMaterial(e.to_string()))?;
    let public = secret.public_key();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| JwtError::KeyMaterial(e.to_string()))?;
    let kid = key_id(&public);

    if let Some(parent) = private_key_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir_all(public_keys_dir)?;

    write_key_file(private_key_path, private_pem.as_bytes(), 0o600)?;
    write_key_file(&public_keys_dir.join(format!("{kid}.pem")), public_pem.as_bytes(), 0o644)?;

    info!(%kid, "Generated signing key pair");
    Ok(kid)
}

fn write_key_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;

    // open() only applies the mode to new files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

#[derive(Clone)]
pub struct JwtManager {
    keys: Arc<KeyRing>,
    issuer: String,
    audience: String,
    access_ttl: Duration,
}

impl JwtManager {
    pub fn new(keys: KeyRing, issuer: &str, audience: &str, access_ttl: Duration) -> Self {
        Self {
            keys: Arc::new(keys),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn jwks(&self) -> JwkSet {
        self.keys.jwks()
    }

    /// Génère un access token signé avec la clé active
    pub fn issue_access_token(&self, user: &UserInfo) -> Result<IssuedAccessToken, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4(),
            role: user.role.clone(),
            tier: user.tier.clone(),
            token_version: user.token_version,
            token_type: TokenType::Access,
        };

        let token = self.sign(&claims)?;
        Ok(IssuedAccessToken { token, claims })
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.keys.active_kid().to_string());
        encode(&header, claims, &self.keys.signing.encoding_key).map_err(JwtError::GenerationFailed)
    }

    /// Checks signature (by `kid`), issuer, audience, `nbf` and `exp` with no
    /// leeway, and that the token is an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        let header = decode_header(token).map_err(|e| JwtError::VerificationFailed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| JwtError::VerificationFailed("missing kid".to_string()))?;
        let key = self
            .keys
            .decoding_key(&kid)
            .ok_or_else(|| JwtError::UnknownKey(kid.clone()))?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iat", "iss", "aud", "sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::VerificationFailed(e.to_string()),
            })?;

        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType(claims.token_type));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ISSUER: &str = "auth-sessions";
    const AUDIENCE: &str = "auth-sessions-api";

    fn make_jwt_manager(keys: KeyRing) -> JwtManager {
        JwtManager::new(keys, ISSUER, AUDIENCE, Duration::minutes(15))
    }

    fn user() -> UserInfo {
        UserInfo {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            name: "Alice".to_string(),
            password_hash: "hash".to_string(),
            role: "admin".to_string(),
            tier: "pro".to_string(),
            token_version: 3,
        }
    }

    fn claims_for(user: &UserInfo, exp_offset: Duration) -> Claims {
        let now = Utc::now();
        Claims {
            sub: user.id,
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat: (now - Duration::minutes(30)).timestamp(),
            nbf: (now - Duration::minutes(30)).timestamp(),
            exp: (now + exp_offset).timestamp(),
            jti: Uuid::new_v4(),
            role: user.role.clone(),
            tier: user.tier.clone(),
            token_version: user.token_version,
            token_type: TokenType::Access,
        }
    }

    #[test]
    fn role_checks_match_the_role_claim_exactly() {
        let mut claims = claims_for(&user(), Duration::minutes(5));
        assert!(claims.is_admin());
        assert!(claims.has_role(&["support", "admin"]));
        assert!(!claims.has_role(&["support"]));

        claims.role = "Admin".to_string();
        assert!(!claims.is_admin());

        claims.role = String::new();
        assert!(!claims.has_role(&[""]));
    }

    #[test]
    fn issue_and_verify_round_trips_claims() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let user = user();

        let issued = jwt.issue_access_token(&user).expect("issue");
        let claims = jwt.verify_access_token(&issued.token).expect("verify");

        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.tier, "pro");
        assert_eq!(claims.token_version, 3);
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn issued_header_names_active_key() {
        let keys = KeyRing::generate().unwrap();
        let kid = keys.active_kid().to_string();
        let jwt = make_jwt_manager(keys);

        let issued = jwt.issue_access_token(&user()).unwrap();
        let header = decode_header(&issued.token).unwrap();

        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some(kid.as_str()));
    }

    #[test]
    fn jti_is_unique_per_token() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let user = user();
        let a = jwt.issue_access_token(&user).unwrap();
        let b = jwt.issue_access_token(&user).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn retired_key_still_verifies_after_rotation() {
        let old_keys = KeyRing::generate().unwrap();
        let old_public = old_keys.active_public_pem().to_string();
        let old_jwt = make_jwt_manager(old_keys);
        let token = old_jwt.issue_access_token(&user()).unwrap().token;

        let rotated = KeyRing::generate()
            .unwrap()
            .with_verification_key(&old_public)
            .unwrap();
        let new_jwt = make_jwt_manager(rotated);

        assert!(new_jwt.verify_access_token(&token).is_ok());
    }

    #[test]
    fn unknown_kid_is_rejected() {
        let token = make_jwt_manager(KeyRing::generate().unwrap())
            .issue_access_token(&user())
            .unwrap()
            .token;
        let other = make_jwt_manager(KeyRing::generate().unwrap());

        let result = other.verify_access_token(&token);

        assert!(matches!(result, Err(JwtError::UnknownKey(_))));
    }

    #[test]
    fn signature_from_another_key_under_known_kid_is_rejected() {
        let victim = make_jwt_manager(KeyRing::generate().unwrap());
        let attacker = KeyRing::generate().unwrap();
        let user = user();

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(victim.keys.active_kid().to_string());
        let forged = encode(
            &header,
            &claims_for(&user, Duration::minutes(5)),
            &attacker.signing.encoding_key,
        )
        .unwrap();

        let result = victim.verify_access_token(&forged);

        assert!(matches!(result, Err(JwtError::VerificationFailed(_))));
    }

    #[test]
    fn missing_kid_is_rejected() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let token = encode(
            &Header::new(Algorithm::ES256),
            &claims_for(&user(), Duration::minutes(5)),
            &jwt.keys.signing.encoding_key,
        )
        .unwrap();

        assert!(matches!(
            jwt.verify_access_token(&token),
            Err(JwtError::VerificationFailed(_))
        ));
    }

    #[test]
    fn expired_token_reports_expiry() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let token = jwt.sign(&claims_for(&user(), Duration::minutes(-1))).unwrap();

        assert!(matches!(jwt.verify_access_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn not_yet_valid_token_is_invalid() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let mut claims = claims_for(&user(), Duration::minutes(30));
        claims.nbf = (Utc::now() + Duration::minutes(10)).timestamp();
        let token = jwt.sign(&claims).unwrap();

        assert!(matches!(
            jwt.verify_access_token(&token),
            Err(JwtError::VerificationFailed(_))
        ));
    }

    #[test]
    fn refresh_typed_token_is_not_an_access_token() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let mut claims = claims_for(&user(), Duration::minutes(5));
        claims.token_type = TokenType::Refresh;
        let token = jwt.sign(&claims).unwrap();

        assert!(matches!(
            jwt.verify_access_token(&token),
            Err(JwtError::WrongTokenType(TokenType::Refresh))
        ));
    }

    #[test]
    fn wrong_issuer_or_audience_is_rejected() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        let mut wrong_iss = claims_for(&user(), Duration::minutes(5));
        wrong_iss.iss = "someone-else".to_string();
        let mut wrong_aud = claims_for(&user(), Duration::minutes(5));
        wrong_aud.aud = "another-api".to_string();

        for claims in [wrong_iss, wrong_aud] {
            let token = jwt.sign(&claims).unwrap();
            assert!(matches!(
                jwt.verify_access_token(&token),
                Err(JwtError::VerificationFailed(_))
            ));
        }
    }

    #[test]
    fn garbage_input_is_rejected() {
        let jwt = make_jwt_manager(KeyRing::generate().unwrap());
        assert!(matches!(
            jwt.verify_access_token("invalid.token.here"),
            Err(JwtError::VerificationFailed(_))
        ));
    }

    #[test]
    fn key_id_is_stable_for_the_same_key() {
        let secret = SecretKey::random(&mut OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();

        let a = KeyRing::from_pem(&pem).unwrap();
        let b = KeyRing::from_pem(&pem).unwrap();

        assert_eq!(a.active_kid(), b.active_kid());
        assert_eq!(a.active_kid().len(), 16);
    }

    #[test]
    fn jwks_lists_active_key_first() {
        let retired = KeyRing::generate().unwrap();
        let ring = KeyRing::generate()
            .unwrap()
            .with_verification_key(retired.active_public_pem())
            .unwrap();

        let jwks = ring.jwks();

        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, ring.active_kid());
        assert!(jwks.find(retired.active_kid()).is_some());
        let key = &jwks.keys[0];
        assert_eq!((key.kty.as_str(), key.crv.as_str(), key.alg.as_str()), ("EC", "P-256", "ES256"));
        assert_eq!(key.x.len(), 43);
        assert_eq!(key.y.len(), 43);
    }

    #[test]
    fn duplicate_verification_key_is_ignored() {
        let ring = KeyRing::generate().unwrap();
        let own = ring.active_public_pem().to_string();
        let ring = ring.with_verification_key(&own).unwrap();
        assert_eq!(ring.jwks().keys.len(), 1);
    }

    #[test]
    fn malformed_key_material_is_rejected() {
        assert!(matches!(
            KeyRing::from_pem("not a pem"),
            Err(JwtError::KeyMaterial(_))
        ));
    }

    #[test]
    fn generated_key_pairs_rotate_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private.pem");
        let public_dir = dir.path().join("public");

        let first = generate_key_pair(&private, &public_dir).unwrap();
        let token = make_jwt_manager(KeyRing::load(&private, &public_dir).unwrap())
            .issue_access_token(&user())
            .unwrap()
            .token;
        let second = generate_key_pair(&private, &public_dir).unwrap();
        let ring = KeyRing::load(&private, &public_dir).unwrap();

        assert_ne!(first, second);
        assert_eq!(ring.active_kid(), second);
        assert!(public_dir.join(format!("{first}.pem")).exists());
        assert!(make_jwt_manager(ring).verify_access_token(&token).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn private_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("private.pem");
        let kid = generate_key_pair(&private, &dir.path().join("public")).unwrap();

        let private_mode = fs::metadata(&private).unwrap().permissions().mode() & 0o777;
        let public_mode = fs::metadata(dir.path().join("public").join(format!("{kid}.pem")))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;

        assert_eq!(private_mode, 0o600);
        assert_eq!(public_mode, 0o644);
    }

    #[test]
    fn load_without_private_key_points_to_keygen() {
        let dir = tempfile::tempdir().unwrap();
        let result = KeyRing::load(&dir.path().join("missing.pem"), dir.path());
        let Err(JwtError::KeyMaterial(msg)) = result else {
            panic!("expected key material error");
        };
        assert!(msg.contains("keygen"));
    }
}
