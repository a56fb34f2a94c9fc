//! Request signing and authentication headers for the CLOB API.
//!
//! The signer is built once from the configured key and owned by the
//! exchange client; nothing is cached globally.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use strum::Display;
use tracing::debug;

use crate::config::Config;
use crate::error::TradingError;

/// Wallet kind the orders are signed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SignatureKind {
    /// Externally owned account.
    Eoa,
    /// Magic.link proxy wallet.
    Proxy,
    /// Gnosis Safe.
    GnosisSafe,
}

impl SignatureKind {
    /// Map the config value (0, 1, 2); unknown values fall back to EOA.
    pub fn from_u8(sig_type: u8) -> Self {
        match sig_type {
            1 => SignatureKind::Proxy,
            2 => SignatureKind::GnosisSafe,
            _ => SignatureKind::Eoa,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureKind::Eoa => 0,
            SignatureKind::Proxy => 1,
            SignatureKind::GnosisSafe => 2,
        }
    }
}

/// Pre-generated L2 API credentials.
#[derive(Debug, Clone)]
struct ApiCredentials {
    key: String,
    passphrase: String,
}

/// Signs order payloads and produces auth headers.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    signer: PrivateKeySigner,
    address: String,
    kind: SignatureKind,
    funder: Option<String>,
    api: Option<ApiCredentials>,
}

/// Create a signer from a hex-encoded private key (with or without 0x).
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, TradingError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| TradingError::SigningError(format!("Invalid private key hex: {}", e)))?;

    let key_bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        TradingError::SigningError(format!("Private key must be 32 bytes, got {}", bytes.len()))
    })?;

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| TradingError::SigningError(format!("Failed to create signer: {}", e)))
}

impl RequestSigner {
    /// Build from a raw key.
    pub fn from_private_key(private_key: &str, kind: SignatureKind) -> Result<Self, TradingError> {
        let signer = create_signer(private_key)?;
        let address = signer.address().to_checksum(None);
        Ok(Self {
            signer,
            address,
            kind,
            funder: None,
            api: None,
        })
    }

    /// Build from configuration, including optional funder and API key.
    pub fn from_config(config: &Config) -> Result<Self, TradingError> {
        if config.polymarket_private_key.is_empty() {
            return Err(TradingError::AuthenticationFailed(
                "POLYMARKET_PRIVATE_KEY is not set".to_string(),
            ));
        }

        let mut signer = Self::from_private_key(
            &config.polymarket_private_key,
            SignatureKind::from_u8(config.polymarket_signature_type),
        )?;
        signer.funder = config.polymarket_funder.clone();
        if let (Some(key), Some(passphrase)) = (
            config.polymarket_api_key.clone(),
            config.polymarket_api_passphrase.clone(),
        ) {
            signer.api = Some(ApiCredentials { key, passphrase });
        }
        Ok(signer)
    }

    /// Checksummed wallet address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Address holding the funds: the funder for proxy wallets, else the signer.
    pub fn maker(&self) -> &str {
        self.funder.as_deref().unwrap_or(&self.address)
    }

    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    /// Sign an arbitrary payload, returning a 0x-prefixed hex signature.
    pub async fn sign_payload(&self, payload: &[u8]) -> Result<String, TradingError> {
        let signature = self
            .signer
            .sign_message(payload)
            .await
            .map_err(|e| TradingError::SigningError(format!("Failed to sign message: {}", e)))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Authentication headers for one request.
    pub async fn auth_headers(&self) -> Result<Vec<(String, String)>, TradingError> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let message = format!("polymarket:{}", timestamp);
        let signature = self.sign_payload(message.as_bytes()).await?;

        let mut headers = vec![
            ("POLY_ADDRESS".to_string(), self.address.clone()),
            ("POLY_SIGNATURE".to_string(), signature),
            ("POLY_TIMESTAMP".to_string(), timestamp),
            ("POLY_NONCE".to_string(), "0".to_string()),
        ];
        if let Some(api) = &self.api {
            headers.push(("POLY_API_KEY".to_string(), api.key.clone()));
            headers.push(("POLY_PASSPHRASE".to_string(), api.passphrase.clone()));
        }

        debug!(address = %self.address, "Generated auth headers");
        Ok(headers)
    }
}
