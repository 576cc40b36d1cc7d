// Phone verification codes with expiry
//
// Owned by the server state (one instance per process, passed around by
// reference). Keyed by phone number; only a SHA-256 digest of each code is
// kept. Delivering the code (SMS) happens elsewhere.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, TownhallError};

/// Only Guam numbers are accepted: +1671 followed by seven digits
const PHONE_PREFIX: &str = "+1671";
const LOCAL_DIGITS: usize = 7;

/// Six decimal digits, never a leading zero
const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

#[derive(Debug)]
struct PendingCode {
    digest: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct VerificationCodes {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingCode>>,
}

pub fn validate_phone(phone: &str) -> Result<()> {
    let valid = phone
        .strip_prefix(PHONE_PREFIX)
        .map(|rest| rest.len() == LOCAL_DIGITS && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);

    if !valid {
        return Err(TownhallError::invalid(
            "Only Guam phone numbers are supported (+1671XXXXXXX)",
        ));
    }
    Ok(())
}

fn digest(phone: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", phone, code));
    format!("{:x}", hasher.finalize())
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    rng.gen_range(CODE_MIN..=CODE_MAX).to_string()
}

impl VerificationCodes {
    pub fn new(ttl: std::time::Duration) -> Self {
        VerificationCodes {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(5)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh 6-digit code for `phone`, replacing any previous one.
    pub fn issue(&self, phone: &str) -> Result<String> {
        self.issue_at(phone, Utc::now())
    }

    pub fn issue_at(&self, phone: &str, now: DateTime<Utc>) -> Result<String> {
        validate_phone(phone)?;

        let code = generate_code();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, p| p.expires_at > now);
        pending.insert(
            phone.to_string(),
            PendingCode {
                digest: digest(phone, &code),
                expires_at: now + self.ttl,
            },
        );

        Ok(code)
    }

    /// True iff `code` is the live code for `phone`. A match consumes it.
    pub fn confirm(&self, phone: &str, code: &str) -> bool {
        self.confirm_at(phone, code, Utc::now())
    }

    pub fn confirm_at(&self, phone: &str, code: &str, now: DateTime<Utc>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, p| p.expires_at > now);

        let matches = pending
            .get(phone)
            .map(|p| p.digest == digest(phone, code.trim()))
            .unwrap_or(false);

        if matches {
            pending.remove(phone);
        }
        matches
    }

    /// Number of unexpired codes
    pub fn pending_count(&self) -> usize {
        let now = Utc::now();
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.values().filter(|p| p.expires_at > now).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHONE: &str = "+16715551234";

    fn store() -> VerificationCodes {
        VerificationCodes::new(std::time::Duration::from_secs(300))
    }

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone(PHONE).is_ok());
        assert!(validate_phone("+1671555123").is_err());
        assert!(validate_phone("+167155512345").is_err());
        assert!(validate_phone("+14155551234").is_err());
        assert!(validate_phone("+1671555123x").is_err());
    }

    #[test]
    fn test_code_is_six_digits() {
        let codes = store();
        for _ in 0..20 {
            let code = codes.issue(PHONE).unwrap();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(code.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn test_generated_codes_stay_in_range_and_vary() {
        let codes: std::collections::HashSet<u32> = (0..200)
            .map(|_| generate_code().parse::<u32>().unwrap())
            .collect();

        assert!(codes.iter().all(|c| (CODE_MIN..=CODE_MAX).contains(c)));
        assert!(codes.len() > 1);
    }

    #[test]
    fn test_confirm_consumes_code() {
        let codes = store();
        let code = codes.issue(PHONE).unwrap();

        assert!(codes.confirm(PHONE, &code));
        assert!(!codes.confirm(PHONE, &code));
        assert_eq!(codes.pending_count(), 0);
    }

    #[test]
    fn test_wrong_code_or_phone_rejected() {
        let codes = store();
        let code = codes.issue(PHONE).unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };

        assert!(!codes.confirm(PHONE, wrong));
        assert!(!codes.confirm("+16710000000", &code));
        // A miss does not burn the live code
        assert!(codes.confirm(PHONE, &code));
    }

    #[test]
    fn test_expired_code_rejected() {
        let codes = store();
        let issued_at = Utc::now();
        let code = codes.issue_at(PHONE, issued_at).unwrap();

        let later = issued_at + Duration::seconds(301);
        assert!(!codes.confirm_at(PHONE, &code, later));
    }

    #[test]
    fn test_reissue_replaces_previous_code() {
        let codes = store();
        let now = Utc::now();
        let first = codes.issue_at(PHONE, now).unwrap();
        let second = codes.issue_at(PHONE, now).unwrap();

        if first != second {
            assert!(!codes.confirm_at(PHONE, &first, now));
        }
        assert!(codes.confirm_at(PHONE, &second, now));
    }
}
