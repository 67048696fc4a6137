use crate::{policy::PolicyId, Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks tokens bound to a policy object's identity.
pub trait TokenManager: Send + Sync {
    fn issue(&self, id: &PolicyId) -> Result<String>;

    fn validate(&self, id: &PolicyId, token: &str) -> Result<()>;
}

/// Tokens are an HMAC-SHA256 of the policy identity.
#[derive(Clone)]
pub struct HmacTokens {
    key: Vec<u8>,
}

impl HmacTokens {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let key = secret.as_ref().to_vec();
        if key.is_empty() {
            return Err(Error::Token("secret must not be empty".to_string()));
        }
        Ok(Self { key })
    }

    /// Uses a secret generated for this process. Tokens issued by other
    /// processes will not validate.
    pub fn random() -> Self {
        Self {
            key: rand::random::<[u8; 32]>().to_vec(),
        }
    }

    fn mac(&self, id: &PolicyId) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|error| Error::Token(error.to_string()))?;
        mac.update(id.to_string().as_bytes());
        Ok(mac)
    }
}

impl TokenManager for HmacTokens {
    fn issue(&self, id: &PolicyId) -> Result<String> {
        let tag = self.mac(id)?.finalize().into_bytes();
        Ok(URL_SAFE_NO_PAD.encode(tag))
    }

    fn validate(&self, id: &PolicyId, token: &str) -> Result<()> {
        let tag = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| Error::Token(format!("malformed token for {id}")))?;
        self.mac(id)?
            .verify_slice(&tag)
            .map_err(|_| Error::Token(format!("token does not match {id}")))
    }
}

impl std::fmt::Debug for HmacTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokens").finish_non_exhaustive()
    }
}
