use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed (malformed ciphertext or key mismatch)")]
    Decrypt,

    #[error("signature mismatch for entry {0}")]
    Signature(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("authentication failed")]
    Authentication,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = TrustError> = std::result::Result<T, E>;
