//! Conversion progress reporting for long-running encrypt/decrypt passes.

use serde::{Deserialize, Serialize};

/// Conversion state of a volume as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStatus {
    Decrypted,
    Encrypted,
    EncryptionInProgress,
    DecryptionInProgress,
    EncryptionPaused,
    DecryptionPaused,
}

impl ConversionStatus {
    /// Map the broker's numeric status code; `None` for codes this client
    /// does not know.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ConversionStatus::Decrypted),
            1 => Some(ConversionStatus::Encrypted),
            2 => Some(ConversionStatus::EncryptionInProgress),
            3 => Some(ConversionStatus::DecryptionInProgress),
            4 => Some(ConversionStatus::EncryptionPaused),
            5 => Some(ConversionStatus::DecryptionPaused),
            _ => None,
        }
    }
}

/// Receives conversion progress while an encrypt or decrypt pass runs.
/// Called from the thread driving the pass.
pub trait ProgressListener: Send + Sync {
    fn notify_status(&self, status: ConversionStatus, percentage: f64);
}
