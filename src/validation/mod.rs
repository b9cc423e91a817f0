//! Recipient address validation.
//!
//! Alert authors type addresses into free-form fields, so a field may hold
//! several addresses separated by semicolons, commas or spaces. Validation is
//! deliberately conservative: universal syntax rules plus an optional
//! administrator pattern, and no normalization of any kind.
//!
//! Problems are returned as values. A table walk never stops early; a field
//! stops at its first bad address.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error};

use crate::types::ValidationError;

lazy_static! {
    static ref RECIPIENT_SEPARATORS: Regex = Regex::new(r"[; ,]+").unwrap();
}

/// First display row of table data; row 1 is the header.
pub const FIRST_DATA_ROW: usize = 2;

/// Offending values longer than this are shortened in reports.
pub const MAX_REPORTED_ADDRESS_CHARS: usize = 64;

const MIN_ADDRESS_CHARS: usize = 6;
const MAX_LOCAL_PART_CHARS: usize = 64;
const MAX_ADDRESS_CHARS: usize = 254;

/// Splits a raw address field into individual addresses.
///
/// The field is trimmed first, then split on any run of `;`, `,` or space.
/// An empty field yields a single empty entry, and a trailing separator
/// yields a trailing empty entry.
pub fn split_addresses(raw: &str) -> Vec<&str> {
    RECIPIENT_SEPARATORS.split(raw.trim()).collect()
}

/// Operator-configured pattern every address must match.
///
/// Matching is anchored at the start of the address only, so `.*@corp\.com`
/// accepts `a@corp.com` and `a@corp.com.evil` alike; anchor the end in the
/// pattern itself when that matters.
#[derive(Debug, Clone)]
pub struct AdminPattern {
    source: String,
    regex: Regex,
}

impl AdminPattern {
    /// Compiles an administrator pattern.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let source = pattern.into();
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self { source, regex })
    }

    /// Returns the pattern as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the address matches from its first character.
    pub fn matches(&self, address: &str) -> bool {
        self.regex.is_match(address)
    }
}

/// Why a single address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressProblem {
    /// Nothing between two separators.
    #[error("Address is empty")]
    Empty,
    /// The administrator pattern did not match.
    #[error("Address must match regex pattern set by the administrator: {pattern}")]
    PatternMismatch {
        /// The pattern as configured.
        pattern: String,
    },
    /// Shorter than six characters.
    #[error("Address is too short: {address}")]
    TooShort {
        /// The rejected address.
        address: String,
    },
    /// Contains a non-ASCII character.
    #[error("Address must contain only ASCII characters: {address}")]
    NonAscii {
        /// The rejected address.
        address: String,
    },
    /// No `@`, or no `.` in the domain.
    #[error("Address has too few parts")]
    TooFewParts,
    /// Local part longer than 64 characters.
    #[error("Localpart of address exceeds max length (64 characters)")]
    LocalPartTooLong,
    /// Address longer than 254 characters.
    #[error("Address exceeds max length (254 characters)")]
    TooLong,
    /// Something other than letters, digits and `-_.%+` in the local part,
    /// or `-_.` in the host.
    #[error("Address has funny characters")]
    FunnyCharacters,
}

/// The first bad address in a field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{problem}: {address}")]
pub struct InvalidAddress {
    /// The address, shortened to 64 characters plus `...` when longer.
    pub address: String,
    /// The reason it was rejected.
    pub problem: AddressProblem,
}

/// A row of alert data that can be looked up by column name.
pub trait FieldSource {
    /// Returns the value of a column, or `None` if the row lacks it.
    fn field(&self, name: &str) -> Option<&str>;
}

impl FieldSource for HashMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl FieldSource for BTreeMap<String, String> {
    fn field(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl<T: FieldSource + ?Sized> FieldSource for &T {
    fn field(&self, name: &str) -> Option<&str> {
        (**self).field(name)
    }
}

/// Which columns of an alert table hold addresses.
#[derive(Debug, Clone, Copy)]
pub struct TableFields<'a> {
    /// Recipient column. Always validated, never allowed empty.
    pub to: &'a str,
    /// Sender column, if the table overrides the sender.
    pub from: Option<&'a str>,
    /// CC column, may be empty.
    pub cc: Option<&'a str>,
    /// BCC column, may be empty.
    pub bcc: Option<&'a str>,
}

impl<'a> TableFields<'a> {
    /// Creates a layout with only a recipient column.
    pub fn to(to: &'a str) -> Self {
        Self { to, from: None, cc: None, bcc: None }
    }

    /// Sets the sender column.
    pub fn with_from(mut self, from: &'a str) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets the CC column.
    pub fn with_cc(mut self, cc: &'a str) -> Self {
        self.cc = Some(cc);
        self
    }

    /// Sets the BCC column.
    pub fn with_bcc(mut self, bcc: &'a str) -> Self {
        self.bcc = Some(bcc);
        self
    }
}

/// Address syntax checks.
pub struct AddressValidator;

impl AddressValidator {
    /// Checks one address. Rules apply in order and the first failure wins.
    pub fn validate_one(address: &str, pattern: Option<&AdminPattern>) -> Result<(), AddressProblem> {
        let result = Self::check(address, pattern);
        if let Err(problem) = &result {
            error!(address, reason = %problem, "Address is invalid");
        }
        result
    }

    fn check(address: &str, pattern: Option<&AdminPattern>) -> Result<(), AddressProblem> {
        if address.is_empty() {
            return Err(AddressProblem::Empty);
        }

        if let Some(pattern) = pattern {
            debug!(address, pattern = pattern.as_str(), "Testing address against administrator pattern");
            if !pattern.matches(address) {
                return Err(AddressProblem::PatternMismatch {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        if address.chars().count() < MIN_ADDRESS_CHARS {
            return Err(AddressProblem::TooShort { address: address.to_string() });
        }

        if !address.is_ascii() {
            return Err(AddressProblem::NonAscii { address: address.to_string() });
        }

        let (local_part, domain) = address.rsplit_once('@').ok_or(AddressProblem::TooFewParts)?;
        let (host, top_level) = domain.rsplit_once('.').ok_or(AddressProblem::TooFewParts)?;
        debug!(local_part, domain, host, top_level, "Split address");

        let local_part: String = local_part
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | '.' | '%' | '+'))
            .collect();
        let host: String = host
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | '.'))
            .collect();

        if local_part.len() > MAX_LOCAL_PART_CHARS {
            return Err(AddressProblem::LocalPartTooLong);
        }

        if address.len() > MAX_ADDRESS_CHARS {
            return Err(AddressProblem::TooLong);
        }

        if is_alphanumeric(&local_part) && is_alphanumeric(&host) {
            Ok(())
        } else {
            Err(AddressProblem::FunnyCharacters)
        }
    }

    /// Checks every address in a raw field and reports the first bad one.
    ///
    /// When `empty_ok` is set, reaching an empty entry accepts the whole field
    /// without looking at the entries after it.
    pub fn validate_field(
        addresses: &str,
        empty_ok: bool,
        pattern: Option<&AdminPattern>,
    ) -> Result<(), InvalidAddress> {
        debug!(field = addresses, "Validating email field value");

        for address in split_addresses(addresses) {
            debug!(address, "Validating presumed email address");
            if empty_ok && address.is_empty() {
                return Ok(());
            }

            if let Err(problem) = Self::validate_one(address, pattern) {
                return Err(InvalidAddress {
                    address: truncate_for_report(address),
                    problem,
                });
            }
        }

        Ok(())
    }

    /// Validates the address columns of every row and collects the problems.
    ///
    /// Rows are numbered for display starting at [`FIRST_DATA_ROW`]. A column
    /// missing from a row is treated as an empty value.
    pub fn validate_table<I, R>(
        rows: I,
        from_pattern: Option<&AdminPattern>,
        recipient_pattern: Option<&AdminPattern>,
        fields: TableFields<'_>,
    ) -> Vec<ValidationError>
    where
        I: IntoIterator<Item = R>,
        R: FieldSource,
    {
        let checks = [
            Some((fields.to, false, recipient_pattern)),
            fields.from.map(|name| (name, false, from_pattern)),
            fields.cc.map(|name| (name, true, recipient_pattern)),
            fields.bcc.map(|name| (name, true, recipient_pattern)),
        ];

        rows.into_iter()
            .enumerate()
            .flat_map(|(index, row)| {
                let row_number = index + FIRST_DATA_ROW;
                checks
                    .iter()
                    .flatten()
                    .filter_map(|&(name, empty_ok, pattern)| {
                        let value = row.field(name).unwrap_or("");
                        Self::validate_field(value, empty_ok, pattern)
                            .err()
                            .map(|invalid| ValidationError {
                                row: row_number,
                                field: name.to_string(),
                                value: invalid.address,
                                message: invalid.problem.to_string(),
                            })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

fn is_alphanumeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn truncate_for_report(address: &str) -> String {
    match address.char_indices().nth(MAX_REPORTED_ADDRESS_CHARS) {
        Some((cut, _)) => format!("{}...", &address[..cut]),
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case("ops@example.com;dba@example.com")]
    #[case("ops@example.com,dba@example.com")]
    #[case("ops@example.com dba@example.com")]
    #[case("ops@example.com; dba@example.com")]
    #[case("ops@example.com , ;dba@example.com")]
    #[case("  ops@example.com;;;dba@example.com \t")]
    fn test_split_delimiter_variants(#[case] raw: &str) {
        assert_eq!(split_addresses(raw), vec!["ops@example.com", "dba@example.com"]);
    }

    #[test]
    fn test_split_edges() {
        assert_eq!(split_addresses(""), vec![""]);
        assert_eq!(split_addresses("   "), vec![""]);
        assert_eq!(split_addresses("a@b.com;"), vec!["a@b.com", ""]);
        assert_eq!(split_addresses(";a@b.com"), vec!["", "a@b.com"]);
    }

    #[rstest]
    #[case("abc@def.com")]
    #[case("first.last+tag@sub.example.co.uk")]
    #[case("a_b-c%d@my-host.org")]
    #[case("a@b.co")]
    fn test_valid_addresses(#[case] address: &str) {
        assert_eq!(AddressValidator::validate_one(address, None), Ok(()));
    }

    #[rstest]
    #[case("", AddressProblem::Empty)]
    #[case("a@b.c", AddressProblem::TooShort { address: "a@b.c".into() })]
    #[case("jörg@example.com", AddressProblem::NonAscii { address: "jörg@example.com".into() })]
    #[case("no-at-sign.com", AddressProblem::TooFewParts)]
    #[case("user@localhost", AddressProblem::TooFewParts)]
    #[case("two@@example.com", AddressProblem::FunnyCharacters)]
    #[case("@example.com", AddressProblem::FunnyCharacters)]
    #[case("user@.com", AddressProblem::FunnyCharacters)]
    #[case("us er!@example.com", AddressProblem::FunnyCharacters)]
    fn test_invalid_addresses(#[case] address: &str, #[case] expected: AddressProblem) {
        assert_eq!(AddressValidator::validate_one(address, None), Err(expected));
    }

    #[test]
    fn test_non_ascii_always_rejected() {
        for address in ["ops@exämple.com", "ópś@example.com", "ops@example.cöm"] {
            assert!(matches!(
                AddressValidator::validate_one(address, None),
                Err(AddressProblem::NonAscii { .. })
            ));
        }
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(65);
        assert_eq!(
            AddressValidator::validate_one(&format!("{}@example.com", local), None),
            Err(AddressProblem::LocalPartTooLong)
        );

        // Stripped characters do not count against the local part.
        let dotted = "a.".repeat(40);
        assert_eq!(
            AddressValidator::validate_one(&format!("{}b@example.com", dotted), None),
            Ok(())
        );

        let host = "h".repeat(250);
        assert_eq!(
            AddressValidator::validate_one(&format!("user@{}.com", host), None),
            Err(AddressProblem::TooLong)
        );
    }

    #[test]
    fn test_admin_pattern_is_start_anchored() {
        let pattern = AdminPattern::new(r".*@corp\.com").unwrap();
        assert!(pattern.matches("ops@corp.com"));
        assert!(pattern.matches("ops@corp.com.evil.org"));

        let pattern = AdminPattern::new(r"corp").unwrap();
        assert!(!pattern.matches("ops@corp.com"));
    }

    #[test]
    fn test_admin_pattern_checked_before_syntax() {
        let pattern = AdminPattern::new(r".*@corp\.com$").unwrap();
        assert_eq!(AddressValidator::validate_one("ops@corp.com", Some(&pattern)), Ok(()));
        assert_eq!(
            AddressValidator::validate_one("a@b", Some(&pattern)),
            Err(AddressProblem::PatternMismatch { pattern: r".*@corp\.com$".into() })
        );
        assert!(AdminPattern::new("(unclosed").is_err());
    }

    #[test]
    fn test_field_reports_first_failure_only() {
        let err = AddressValidator::validate_field("ok@example.com; bad; a@b", false, None).unwrap_err();
        assert_eq!(err.address, "bad");
        assert_eq!(err.problem, AddressProblem::TooShort { address: "bad".into() });
    }

    #[test]
    fn test_field_empty_handling() {
        assert!(AddressValidator::validate_field("", true, None).is_ok());
        assert_eq!(
            AddressValidator::validate_field("", false, None).unwrap_err().problem,
            AddressProblem::Empty
        );
        // An empty entry accepts the rest of an optional field unchecked.
        assert!(AddressValidator::validate_field("ok@example.com;", true, None).is_ok());
        assert!(AddressValidator::validate_field("ok@example.com;", false, None).is_err());
    }

    #[test]
    fn test_field_truncates_long_values() {
        let long = format!("{}@example", "x".repeat(80));
        let err = AddressValidator::validate_field(&long, false, None).unwrap_err();
        assert_eq!(err.address.chars().count(), MAX_REPORTED_ADDRESS_CHARS + 3);
        assert!(err.address.ends_with("..."));
        assert_eq!(err.problem, AddressProblem::TooFewParts);
    }

    #[test]
    fn test_table_row_numbers_account_for_header() {
        let rows = vec![
            row(&[("Email To", "ops@example.com")]),
            row(&[("Email To", "")]),
            row(&[("Email To", "dba@example.com")]),
        ];

        let errors = AddressValidator::validate_table(&rows, None, None, TableFields::to("Email To"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row, 3);
        assert_eq!(errors[0].field, "Email To");
        assert_eq!(errors[0].message, "Address is empty");
    }

    #[test]
    fn test_table_checks_all_fields_and_rows() {
        let from_pattern = AdminPattern::new(r".*@alerts\.example\.com$").unwrap();
        let recipient_pattern = AdminPattern::new(r".*@example\.com$").unwrap();
        let fields = TableFields::to("To")
            .with_from("From")
            .with_cc("CC")
            .with_bcc("BCC");

        let rows = vec![
            row(&[
                ("To", "ops@example.com"),
                ("From", "noreply@alerts.example.com"),
                ("CC", ""),
                ("BCC", ""),
            ]),
            row(&[
                ("To", "ops@elsewhere.org"),
                ("From", "me@example.com"),
                ("CC", "dba@example.com"),
                ("BCC", "spy@elsewhere.org"),
            ]),
            row(&[("To", "ops@example.com"), ("From", "noreply@alerts.example.com")]),
        ];

        let errors = AddressValidator::validate_table(
            rows.iter(),
            Some(&from_pattern),
            Some(&recipient_pattern),
            fields,
        );

        let summary: Vec<(usize, &str)> = errors.iter().map(|e| (e.row, e.field.as_str())).collect();
        assert_eq!(summary, vec![(3, "To"), (3, "From"), (3, "BCC")]);
        assert!(errors[1].message.contains(r".*@alerts\.example\.com$"));
    }

    #[test]
    fn test_table_over_btreemap_rows() {
        let mut row = BTreeMap::new();
        row.insert("To".to_string(), "short".to_string());
        let errors = AddressValidator::validate_table(vec![row], None, None, TableFields::to("To"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row, 2);
        assert_eq!(errors[0].value, "short");
    }
}
