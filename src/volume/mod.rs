//! Volume-lock control.
//!
//! Thin domain layer over the invocation bridge: every operation is one
//! fixed query template plus one named method call against the encryptable
//! volume class. The broker performs all actual encryption work; this module
//! only marshals arguments, interprets status codes, and runs the
//! compensating actions (protector rollback, protector re-enable) the
//! operations require.
//!
//! Two failure tiers run through every operation: an `Err` means the broker
//! could not be driven at all (protocol tier); `Ok(false)` / `Ok(None)`
//! means the broker executed the call and reported failure (domain tier) —
//! that is data the caller may react to, not an exception.

pub mod progress;

pub use progress::{ConversionStatus, ProgressListener};

use crate::broker::{ArgumentBag, Broker, BrokerError, InvocationResult, MethodBridge, Query};
use crate::config::PollConfig;
use crate::volmgr_log;
use log::Level;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Class exposing one object per encryptable volume.
pub const ENCRYPTABLE_VOLUME_CLASS: &str = "Win32_EncryptableVolume";

// Key protector types understood by the broker.
const PROTECTOR_EXTERNAL_KEY: i64 = 2;
const PROTECTOR_NUMERICAL: i64 = 3;
const PROTECTOR_PASSPHRASE: i64 = 8;

const VOLUME_KEY_PROTECTOR_ID: &str = "VolumeKeyProtectorID";

/// Protection status of one volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Unprotected,
    Unlocked,
    Locked,
}

/// Volume encryption control bound to one broker connection.
///
/// Explicitly constructed and explicitly owned; independent instances over
/// independent connections can coexist.
pub struct VolumeLocker {
    bridge: MethodBridge,
    poll: PollConfig,
}

impl VolumeLocker {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_poll(broker, PollConfig::default())
    }

    pub fn with_poll(broker: Arc<dyn Broker>, poll: PollConfig) -> Self {
        VolumeLocker { bridge: MethodBridge::new(broker), poll }
    }

    fn volume_query(letter: char) -> Query {
        Query::where_eq(ENCRYPTABLE_VOLUME_CLASS, "DriveLetter", format!("{letter}:"))
    }

    fn call(
        &self,
        letter: char,
        method: &str,
        inputs: &ArgumentBag,
        outputs: &[&str],
    ) -> Result<InvocationResult, BrokerError> {
        self.bridge.invoke(&Self::volume_query(letter), method, inputs, outputs)
    }

    // ───── enumeration & status ─────────────────────────────────────────────

    /// Letters of every volume the broker can protect.
    pub fn lockable_drive_letters(&self) -> Result<Vec<char>, BrokerError> {
        let volumes = self.bridge.broker().query(&Query::all(ENCRYPTABLE_VOLUME_CLASS))?;
        let letters = volumes
            .iter()
            .filter_map(|v| v.snapshot().get("DriveLetter").as_str())
            .filter_map(|s| s.chars().next())
            .collect();
        Ok(letters)
    }

    /// Protection status of one volume.
    pub fn lock_status(&self, letter: char) -> Result<LockStatus, BrokerError> {
        let mut volumes = self.bridge.broker().query(&Self::volume_query(letter))?;
        if volumes.is_empty() {
            return Err(BrokerError::NotFound);
        }
        let volume = volumes.swap_remove(0);
        match volume.snapshot().get("ProtectionStatus").as_int() {
            Some(0) => Ok(LockStatus::Unprotected),
            Some(1) => Ok(LockStatus::Unlocked),
            Some(2) => Ok(LockStatus::Locked),
            _ => Err(BrokerError::Malformed("ProtectionStatus")),
        }
    }

    // ───── enable / disable / lock ──────────────────────────────────────────

    /// Protect a volume with a passphrase and encrypt it (AES-128, used
    /// space only), polling conversion progress until the pass settles.
    ///
    /// The protector added first is rolled back when any later step fails —
    /// a half-protected volume must not keep a dangling passphrase.
    pub fn enable_locker(
        &self,
        letter: char,
        passphrase: &str,
        progress: Option<&dyn ProgressListener>,
    ) -> Result<bool, BrokerError> {
        let Some(protector_id) = self.protect_with_passphrase(letter, passphrase)? else {
            return Ok(false);
        };
        volmgr_log!(Level::Info, "volume", "{letter}: passphrase protector {protector_id} added");

        let inputs = ArgumentBag::new()
            .with("EncryptionMethod", "3") // AES 128
            .with("EncryptionFlags", "1"); // used space only
        let encrypt = match self.call(letter, "Encrypt", &inputs, &[]) {
            Ok(result) => result,
            Err(err) => {
                let _ = self.delete_all_key_protectors(letter);
                return Err(err);
            }
        };

        self.wait_for_conversion(
            letter,
            ConversionStatus::EncryptionInProgress,
            self.poll.encrypt_interval,
            progress,
            false,
        );
        let success = encrypt.succeeded();

        if !success {
            volmgr_log!(Level::Warn, "volume", "{letter}: encrypt failed, rolling back protectors");
            let _ = self.delete_all_key_protectors(letter);
        }
        Ok(success)
    }

    /// Decrypt a volume, polling progress until the pass settles. Reported
    /// percentages count down from 100.
    pub fn disable_locker(
        &self,
        letter: char,
        progress: Option<&dyn ProgressListener>,
    ) -> Result<bool, BrokerError> {
        let result = self.call(letter, "Decrypt", &ArgumentBag::new(), &[])?;
        self.wait_for_conversion(
            letter,
            ConversionStatus::DecryptionInProgress,
            self.poll.decrypt_interval,
            progress,
            true,
        );
        Ok(result.succeeded())
    }

    /// Lock an unlocked volume.
    pub fn lock_drive(&self, letter: char) -> Result<bool, BrokerError> {
        let result = self.call(letter, "Lock", &ArgumentBag::new(), &[])?;
        Ok(result.succeeded())
    }

    // ───── passphrase protectors ────────────────────────────────────────────

    pub fn has_password(&self, letter: char) -> Result<bool, BrokerError> {
        let ids = self.key_protectors(letter, PROTECTOR_PASSPHRASE)?;
        Ok(ids.first().is_some_and(|id| !id.is_empty()))
    }

    pub fn unlock_by_password(&self, letter: char, passphrase: &str) -> Result<bool, BrokerError> {
        let inputs = ArgumentBag::new().with("Passphrase", passphrase);
        let result = self.call(letter, "UnlockWithPassphrase", &inputs, &[])?;
        Ok(result.succeeded())
    }

    /// Replace every protector with a single new passphrase. All protectors
    /// are disabled and deleted first; whatever happens, protectors are
    /// re-enabled before returning so the volume is never left disarmed.
    pub fn change_password(&self, letter: char, new_passphrase: &str) -> Result<bool, BrokerError> {
        let outcome = (|| -> Result<bool, BrokerError> {
            if !self.disable_all_key_protectors(letter)? {
                return Ok(false);
            }
            if !self.delete_all_key_protectors(letter)? {
                return Ok(false);
            }
            let id = self.protect_with_passphrase(letter, new_passphrase)?;
            Ok(id.is_some_and(|id| !id.is_empty()))
        })();
        let _ = self.enable_all_key_protectors(letter);
        outcome
    }

    // ───── numerical (recovery) password protectors ─────────────────────────

    pub fn has_numerical_password(&self, letter: char) -> Result<bool, BrokerError> {
        let ids = self.key_protectors(letter, PROTECTOR_NUMERICAL)?;
        Ok(ids.first().is_some_and(|id| !id.is_empty()))
    }

    pub fn unlock_by_numerical_password(
        &self,
        letter: char,
        numerical_password: &str,
    ) -> Result<bool, BrokerError> {
        let inputs = ArgumentBag::new().with("NumericalPassword", numerical_password);
        let result = self.call(letter, "UnlockWithNumericalPassword", &inputs, &[])?;
        Ok(result.succeeded())
    }

    /// Set a numerical password, replacing an existing one. A volume carries
    /// at most one numerical protector.
    pub fn set_numerical_password(
        &self,
        letter: char,
        numerical_password: &str,
    ) -> Result<bool, BrokerError> {
        if self.has_numerical_password(letter)? && !self.remove_numerical_password(letter)? {
            return Ok(false);
        }

        let inputs = ArgumentBag::new().with("NumericalPassword", numerical_password);
        let result = self.call(
            letter,
            "ProtectKeyWithNumericalPassword",
            &inputs,
            &[VOLUME_KEY_PROTECTOR_ID],
        )?;
        if !result.succeeded() {
            return Ok(false);
        }
        Ok(result
            .output(VOLUME_KEY_PROTECTOR_ID)
            .as_str()
            .is_some_and(|id| !id.is_empty()))
    }

    pub fn remove_numerical_password(&self, letter: char) -> Result<bool, BrokerError> {
        let ids = self.key_protectors(letter, PROTECTOR_NUMERICAL)?;
        let mut deleted = false;
        for id in &ids {
            deleted = self.delete_key_protector(letter, id)?;
        }
        Ok(deleted)
    }

    // ───── auto-unlock ──────────────────────────────────────────────────────

    pub fn is_auto_unlock(&self, letter: char) -> Result<bool, BrokerError> {
        let result =
            self.call(letter, "IsAutoUnlockEnabled", &ArgumentBag::new(), &["IsAutoUnlockEnabled"])?;
        if !result.succeeded() {
            return Ok(false);
        }
        Ok(result.output("IsAutoUnlockEnabled").as_bool().unwrap_or(false))
    }

    /// Toggle auto-unlock. Enabling reuses an existing external-key
    /// protector or creates one; disabling deletes the external keys after
    /// turning the flag off.
    pub fn set_auto_unlock(&self, letter: char, enable: bool) -> Result<bool, BrokerError> {
        if self.is_auto_unlock(letter)? == enable {
            return Ok(true);
        }

        if enable {
            let ids = self.key_protectors(letter, PROTECTOR_EXTERNAL_KEY)?;
            let id = match ids.into_iter().next().filter(|id| !id.is_empty()) {
                Some(id) => id,
                None => match self.protect_with_external_key(letter)? {
                    Some(id) if !id.is_empty() => id,
                    _ => return Ok(false),
                },
            };
            let inputs = ArgumentBag::new().with(VOLUME_KEY_PROTECTOR_ID, id);
            let result = self.call(letter, "EnableAutoUnlock", &inputs, &[])?;
            Ok(result.succeeded())
        } else {
            let result = self.call(letter, "DisableAutoUnlock", &ArgumentBag::new(), &[])?;
            for id in self.key_protectors(letter, PROTECTOR_EXTERNAL_KEY)? {
                let _ = self.delete_key_protector(letter, &id);
            }
            Ok(result.succeeded())
        }
    }

    // ───── volume identifier ────────────────────────────────────────────────

    pub fn set_identifier(&self, letter: char, identifier: &str) -> Result<bool, BrokerError> {
        let inputs = ArgumentBag::new().with("IdentificationField", identifier);
        let result = self.call(letter, "SetIdentificationField", &inputs, &[])?;
        Ok(result.succeeded())
    }

    /// `None` when the broker reported failure or returned no identifier.
    pub fn identifier(&self, letter: char) -> Result<Option<String>, BrokerError> {
        let result = self.call(
            letter,
            "GetIdentificationField",
            &ArgumentBag::new(),
            &["IdentificationField"],
        )?;
        if !result.succeeded() {
            return Ok(None);
        }
        Ok(result.output("IdentificationField").as_str().map(str::to_owned))
    }

    // ───── conversion status ────────────────────────────────────────────────

    /// One conversion-status sample. `Ok(None)` when the broker executed the
    /// call but reported failure.
    pub fn conversion_status(
        &self,
        letter: char,
    ) -> Result<Option<(ConversionStatus, f64)>, BrokerError> {
        let inputs = ArgumentBag::new().with("PrecisionFactor", "1");
        let result = self.call(
            letter,
            "GetConversionStatus",
            &inputs,
            &["ConversionStatus", "EncryptionPercentage"],
        )?;
        if !result.succeeded() {
            return Ok(None);
        }

        let code = result
            .output("ConversionStatus")
            .as_int()
            .ok_or(BrokerError::Malformed("ConversionStatus"))?;
        let status =
            ConversionStatus::from_code(code).ok_or(BrokerError::Malformed("ConversionStatus"))?;
        let percentage = result
            .output("EncryptionPercentage")
            .as_int()
            .map(|tenths| tenths as f64 / 10.0)
            .unwrap_or(0.0);
        Ok(Some((status, percentage)))
    }

    /// Poll conversion status on a fixed interval until the pass leaves
    /// `active`, notifying `progress` after each sample. A failed sample
    /// aborts the wait; whatever progress was reported so far stands. There
    /// is no cancellation token — callers who need one run this on a
    /// dedicated thread they control.
    fn wait_for_conversion(
        &self,
        letter: char,
        active: ConversionStatus,
        interval: Duration,
        progress: Option<&dyn ProgressListener>,
        count_down: bool,
    ) {
        loop {
            thread::sleep(interval);

            let sample = match self.conversion_status(letter) {
                Ok(Some(sample)) => sample,
                Ok(None) | Err(_) => break,
            };
            let (status, percentage) = sample;
            if let Some(listener) = progress {
                let reported = if count_down { 100.0 - percentage } else { percentage };
                listener.notify_status(status, reported);
            }
            if status != active {
                break;
            }
        }
    }

    // ───── key protector plumbing ───────────────────────────────────────────

    /// IDs of every protector of `protector_type` on the volume; empty when
    /// the broker reported failure.
    pub fn key_protectors(
        &self,
        letter: char,
        protector_type: i64,
    ) -> Result<Vec<String>, BrokerError> {
        let inputs = ArgumentBag::new().with("KeyProtectorType", protector_type.to_string());
        let result =
            self.call(letter, "GetKeyProtectors", &inputs, &[VOLUME_KEY_PROTECTOR_ID])?;
        if !result.succeeded() {
            return Ok(Vec::new());
        }
        Ok(result
            .output(VOLUME_KEY_PROTECTOR_ID)
            .as_str_array()
            .map(<[String]>::to_vec)
            .unwrap_or_default())
    }

    /// Add a passphrase protector; `None` when the broker reported failure
    /// or returned no ID.
    pub fn protect_with_passphrase(
        &self,
        letter: char,
        passphrase: &str,
    ) -> Result<Option<String>, BrokerError> {
        let inputs = ArgumentBag::new().with("Passphrase", passphrase);
        let result = self.call(
            letter,
            "ProtectKeyWithPassphrase",
            &inputs,
            &[VOLUME_KEY_PROTECTOR_ID],
        )?;
        if !result.succeeded() {
            return Ok(None);
        }
        Ok(result
            .output(VOLUME_KEY_PROTECTOR_ID)
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_owned))
    }

    /// Add an external-key protector; `None` on domain failure.
    pub fn protect_with_external_key(&self, letter: char) -> Result<Option<String>, BrokerError> {
        let result = self.call(
            letter,
            "ProtectKeyWithExternalKey",
            &ArgumentBag::new(),
            &[VOLUME_KEY_PROTECTOR_ID],
        )?;
        if !result.succeeded() {
            return Ok(None);
        }
        Ok(result.output(VOLUME_KEY_PROTECTOR_ID).as_str().map(str::to_owned))
    }

    pub fn enable_all_key_protectors(&self, letter: char) -> Result<bool, BrokerError> {
        let result = self.call(letter, "EnableKeyProtectors", &ArgumentBag::new(), &[])?;
        Ok(result.succeeded())
    }

    pub fn disable_all_key_protectors(&self, letter: char) -> Result<bool, BrokerError> {
        let result = self.call(letter, "DisableKeyProtectors", &ArgumentBag::new(), &[])?;
        Ok(result.succeeded())
    }

    pub fn delete_key_protector(&self, letter: char, id: &str) -> Result<bool, BrokerError> {
        let inputs = ArgumentBag::new().with(VOLUME_KEY_PROTECTOR_ID, id);
        let result = self.call(letter, "DeleteKeyProtector", &inputs, &[])?;
        Ok(result.succeeded())
    }

    pub fn delete_all_key_protectors(&self, letter: char) -> Result<bool, BrokerError> {
        let result = self.call(letter, "DeleteKeyProtectors", &ArgumentBag::new(), &[])?;
        Ok(result.succeeded())
    }
}
