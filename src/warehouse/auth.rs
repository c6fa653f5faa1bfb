use crate::error::{DeployError, Result};
use crate::warehouse::WarehouseError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use pkcs8::{DecodePrivateKey, EncodePublicKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::RsaPrivateKey;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// 토큰 유효 시간 (Snowflake 최대 1시간)
const TOKEN_LIFETIME_SECS: i64 = 59 * 60;
/// 만료까지 이 시간보다 적게 남으면 재발급
const RENEW_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

/// 키 페어 JWT 발급기
///
/// 개인 키는 한 번만 읽고, 발급한 토큰은 만료 직전까지 재사용합니다.
pub struct KeyPairAuth {
    qualified_user: String,
    fingerprint: String,
    encoding_key: EncodingKey,
    cached: Option<(String, i64)>,
}

impl KeyPairAuth {
    /// 디스크에서 PEM 개인 키 로드
    pub fn from_file(
        path: &Path,
        account: &str,
        user: &str,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        let pem = fs::read_to_string(path).map_err(|e| {
            DeployError::Credential(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_pem(&pem, account, user, passphrase)
    }

    /// PEM 텍스트에서 생성 (암호화/일반 PKCS#8, PKCS#1)
    pub fn from_pem(pem: &str, account: &str, user: &str, passphrase: Option<&str>) -> Result<Self> {
        let key = load_private_key(pem, passphrase).map_err(DeployError::Credential)?;
        let fingerprint = public_key_fingerprint(&key).map_err(DeployError::Credential)?;
        let der = key
            .to_pkcs1_der()
            .map_err(|e| DeployError::Credential(e.to_string()))?;

        Ok(Self {
            qualified_user: format!("{}.{}", account_identifier(account), user.to_uppercase()),
            fingerprint,
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
            cached: None,
        })
    }

    /// 공개 키 지문 (`SHA256:<base64>`)
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// 다음 요청에 사용할 Bearer 토큰
    pub fn token(&mut self) -> std::result::Result<String, WarehouseError> {
        self.token_at(chrono::Utc::now().timestamp())
    }

    pub fn token_at(&mut self, now: i64) -> std::result::Result<String, WarehouseError> {
        if let Some((token, exp)) = &self.cached {
            if now < exp - RENEW_MARGIN_SECS {
                return Ok(token.clone());
            }
        }

        let exp = now + TOKEN_LIFETIME_SECS;
        let claims = Claims {
            iss: format!("{}.{}", self.qualified_user, self.fingerprint),
            sub: self.qualified_user.clone(),
            iat: now,
            exp,
        };

        let token = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| WarehouseError::Token(e.to_string()))?;

        self.cached = Some((token.clone(), exp));
        Ok(token)
    }

    /// 캐시된 토큰 삭제
    pub fn clear(&mut self) {
        self.cached = None;
    }
}

/// JWT 클레임용 계정 식별자 (대문자, 리전/클라우드 접미사 제거)
pub fn account_identifier(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_uppercase()
}

fn load_private_key(pem: &str, passphrase: Option<&str>) -> std::result::Result<RsaPrivateKey, String> {
    let pem = pem.trim();

    if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let passphrase = passphrase.ok_or_else(|| {
            "private key is encrypted but SNOWFLAKE_PRIVATE_KEY_PASSPHRASE is not set".to_string()
        })?;
        return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, passphrase.as_bytes())
            .map_err(|e| format!("cannot decrypt private key: {}", e));
    }

    if pem.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| format!("invalid PKCS#1 key: {}", e));
    }

    RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| format!("invalid PKCS#8 key: {}", e))
}

/// DER 공개 키의 SHA-256 다이제스트를 base64 로 인코딩한 지문
pub fn public_key_fingerprint(key: &RsaPrivateKey) -> std::result::Result<String, String> {
    let der = key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| format!("cannot encode public key: {}", e))?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(format!("SHA256:{}", STANDARD.encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    const PLAIN_KEY: &str = include_str!("../../tests/fixtures/test_key.p8");
    const ENCRYPTED_KEY: &str = include_str!("../../tests/fixtures/test_key_encrypted.p8");
    const FINGERPRINT: &str = "SHA256:3uTRsCeuHILga4nLBMt/gDZvsccARqK8zq7CvboCReE=";

    fn claims_of(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_fingerprint_matches_openssl() {
        let auth = KeyPairAuth::from_pem(PLAIN_KEY, "acct", "deployer", None).unwrap();
        assert_eq!(auth.fingerprint(), FINGERPRINT);
    }

    #[test]
    fn test_encrypted_key_with_passphrase() {
        let auth =
            KeyPairAuth::from_pem(ENCRYPTED_KEY, "acct", "deployer", Some("test-passphrase")).unwrap();
        assert_eq!(auth.fingerprint(), FINGERPRINT);
    }

    #[test]
    fn test_encrypted_key_wrong_passphrase() {
        let result = KeyPairAuth::from_pem(ENCRYPTED_KEY, "acct", "deployer", Some("wrong"));
        assert!(matches!(result, Err(DeployError::Credential(_))));
    }

    #[test]
    fn test_encrypted_key_without_passphrase() {
        let err = KeyPairAuth::from_pem(ENCRYPTED_KEY, "acct", "deployer", None)
            .err()
            .unwrap();
        assert!(err.to_string().contains("SNOWFLAKE_PRIVATE_KEY_PASSPHRASE"));
    }

    #[test]
    fn test_garbage_key() {
        let result = KeyPairAuth::from_pem("not a key", "acct", "deployer", None);
        assert!(matches!(result, Err(DeployError::Credential(_))));
    }

    #[test]
    fn test_missing_key_file() {
        let result = KeyPairAuth::from_file(Path::new("/nonexistent/key.p8"), "acct", "u", None);
        assert!(matches!(result, Err(DeployError::Credential(_))));
    }

    #[test]
    fn test_account_identifier() {
        assert_eq!(account_identifier("xy12345.eu-central-1.aws"), "XY12345");
        assert_eq!(account_identifier("myorg-myaccount"), "MYORG-MYACCOUNT");
    }

    #[test]
    fn test_token_claims() {
        let mut auth = KeyPairAuth::from_pem(PLAIN_KEY, "xy12345.us-east-1", "deployer", None).unwrap();
        let token = auth.token_at(1_700_000_000).unwrap();
        let claims = claims_of(&token);

        assert_eq!(claims["sub"], "XY12345.DEPLOYER");
        assert_eq!(claims["iss"], format!("XY12345.DEPLOYER.{}", FINGERPRINT));
        assert_eq!(claims["iat"], 1_700_000_000);
        assert_eq!(claims["exp"], 1_700_000_000 + TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn test_token_cached_until_near_expiry() {
        let mut auth = KeyPairAuth::from_pem(PLAIN_KEY, "acct", "deployer", None).unwrap();
        let first = auth.token_at(1_000).unwrap();

        assert_eq!(auth.token_at(1_000 + 60).unwrap(), first);

        let renewed = auth.token_at(1_000 + TOKEN_LIFETIME_SECS - RENEW_MARGIN_SECS).unwrap();
        assert_ne!(renewed, first);
    }
}
