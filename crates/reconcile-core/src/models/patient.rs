//! Patient identity model and national-id validation.

use serde::{Deserialize, Serialize};

/// A patient identity as imported from the source system.
///
/// Duplicates of the same real-world person arise from double-imports and
/// manual intake under textual name variants; the matcher partitions them
/// into groups and the planner consolidates each group onto one canonical
/// record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientIdentity {
    /// Primary key.
    pub id: String,
    /// Free-text name as entered at intake.
    pub display_name: String,
    /// National id (CPF). May be null, a placeholder, or malformed.
    pub national_id: Option<String>,
    /// Date of birth (RFC 3339 date), when known.
    pub birth_date: Option<String>,
    /// Id in the upstream source system - null for manually created records.
    pub source_system_id: Option<String>,
    /// Creation timestamp.
    pub created_at: String,
}

impl PatientIdentity {
    /// Create a new identity with required fields.
    pub fn new(display_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            display_name,
            national_id: None,
            birth_date: None,
            source_system_id: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Whether this identity carries a well-formed national id.
    pub fn has_valid_national_id(&self) -> bool {
        self.national_id
            .as_deref()
            .is_some_and(valid_national_id)
    }
}

/// Validate a Brazilian CPF.
///
/// Well-formed means: 11 digits after stripping separators, not a single
/// repeated digit, and both mod-11 check digits correct. Import
/// placeholders (`AUTO-...`, `CONFLICT-...`) fail the digit count and are
/// therefore never treated as strong identifiers.
pub fn valid_national_id(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 11 {
        return false;
    }
    // All-same-digit sequences (000..., 111...) pass the checksum but are
    // known-invalid placeholders.
    if digits.iter().all(|&d| d == digits[0]) {
        return false;
    }

    let check = |len: usize| -> u32 {
        let sum: u32 = digits[..len]
            .iter()
            .enumerate()
            .map(|(i, &d)| d * (len as u32 + 1 - i as u32))
            .sum();
        let rem = (sum * 10) % 11;
        if rem == 10 { 0 } else { rem }
    };

    check(9) == digits[9] && check(10) == digits[10]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_identity() {
        let p = PatientIdentity::new("MARIA SILVA".into());
        assert_eq!(p.display_name, "MARIA SILVA");
        assert!(p.national_id.is_none());
        assert_eq!(p.id.len(), 36); // UUID format
    }

    #[test]
    fn test_valid_cpf() {
        // Known-valid check digit sequences
        assert!(valid_national_id("52998224725"));
        assert!(valid_national_id("529.982.247-25"));
        assert!(valid_national_id("11144477735"));
    }

    #[test]
    fn test_invalid_cpf() {
        assert!(!valid_national_id("52998224724")); // bad check digit
        assert!(!valid_national_id("123456789")); // too short
        assert!(!valid_national_id("11111111111")); // repeated digit
        assert!(!valid_national_id(""));
    }

    #[test]
    fn test_placeholder_cpf_not_valid() {
        assert!(!valid_national_id("AUTO-68f2c1"));
        assert!(!valid_national_id("CONFLICT-52998224725-2"));
    }

    #[test]
    fn test_has_valid_national_id() {
        let mut p = PatientIdentity::new("JOAO".into());
        assert!(!p.has_valid_national_id());
        p.national_id = Some("52998224725".into());
        assert!(p.has_valid_national_id());
        p.national_id = Some("AUTO-abc".into());
        assert!(!p.has_valid_national_id());
    }
}
