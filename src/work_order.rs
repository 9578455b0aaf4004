//! Work-order validation and parsing.
//!
//! A work-order file holds exactly `<hostname> <sr_number> <token>`, separated
//! by any amount of whitespace. [`validate`] applies the rules in order and
//! stops at the first failure.

use crate::error::ValidationError;

/// Length of a service-request identifier.
pub const SR_DIGITS: usize = 9;

/// A parsed work order, valid for one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    pub hostname: String,
    pub sr_number: String,
    pub token: String,
}

/// True when `s` is exactly nine ASCII digits.
pub fn is_sr_number(s: &str) -> bool {
    s.len() == SR_DIGITS && s.bytes().all(|b| b.is_ascii_digit())
}

/// Validates raw file content and projects it onto a [`WorkOrder`].
pub fn validate(raw: &str) -> Result<WorkOrder, ValidationError> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let [hostname, sr_number, token] = fields.as_slice() else {
        return Err(ValidationError::FieldCount {
            found: fields.len(),
        });
    };

    if !is_sr_number(sr_number) {
        return Err(ValidationError::SrFormat {
            value: (*sr_number).to_string(),
        });
    }
    // Unreachable after whitespace splitting, kept so the rule set stays explicit.
    if hostname.is_empty() {
        return Err(ValidationError::EmptyHostname);
    }
    if token.is_empty() {
        return Err(ValidationError::EmptyToken);
    }

    Ok(WorkOrder {
        hostname: (*hostname).to_string(),
        sr_number: (*sr_number).to_string(),
        token: (*token).to_string(),
    })
}
