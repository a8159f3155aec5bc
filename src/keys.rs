use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// The default key namespace.
pub const DEFAULT_PREFIX: &str = "revocation";

/// Derives store keys from a subject id and, for acknowledgements, a client
/// fingerprint.
///
/// Broadcast keys carry the one live command of a subject; device keys carry
/// the last acknowledgement of a single (subject, device) pair.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: String,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl KeyGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of the command published for `subject_id`.
    pub fn broadcast_key(&self, subject_id: &str) -> Result<String> {
        require("subject_id", subject_id)?;

        Ok(format!("{}:subject:{}", self.prefix, subject_id))
    }

    /// Key of the acknowledgement stored for one device of `subject_id`.
    ///
    /// The fingerprint is hashed so arbitrarily long user agents produce
    /// fixed-length keys; the NUL separator keeps `("ab", "c")` and
    /// `("a", "bc")` apart.
    pub fn device_key(&self, subject_id: &str, client_agent: &str, client_addr: &str) -> Result<String> {
        require("subject_id", subject_id)?;
        require("client_agent", client_agent)?;
        require("client_addr", client_addr)?;

        let mut hasher = Sha256::new();
        hasher.update(client_agent.as_bytes());
        hasher.update([0u8]);
        hasher.update(client_addr.as_bytes());
        let fingerprint = hex::encode(hasher.finalize());

        Ok(format!("{}:device:{}:{}", self.prefix, subject_id, fingerprint))
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AppError::InvalidArgument(format!(
            "{} cannot be empty",
            name
        )));
    }
    Ok(())
}
