//! Service addresses: a uuid, an E.164 number, or both.

use std::fmt;

use uuid::Uuid;

use crate::error::StorageError;

/// Address of a recipient as seen on the wire.
///
/// At least one of the two fields is always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecipientAddress {
    uuid: Option<Uuid>,
    number: Option<String>,
}

impl RecipientAddress {
    pub fn new(uuid: Option<Uuid>, number: Option<String>) -> Self {
        assert!(
            uuid.is_some() || number.is_some(),
            "a recipient address needs a uuid or a number"
        );
        Self { uuid, number }
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            number: None,
        }
    }

    pub fn from_number(number: impl Into<String>) -> Self {
        Self {
            uuid: None,
            number: Some(number.into()),
        }
    }

    /// Parse an identifier as used by the protocol layer: either a uuid
    /// string or an E.164 number.
    pub fn from_identifier(identifier: &str) -> Result<Self, StorageError> {
        match Uuid::parse_str(identifier) {
            Ok(uuid) => Ok(Self::from_uuid(uuid)),
            Err(_) => Ok(Self::from_number(normalize_number(identifier)?)),
        }
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    /// The canonical identifier: the uuid if known, the number otherwise.
    pub fn identifier(&self) -> String {
        match (&self.uuid, &self.number) {
            (Some(uuid), _) => uuid.to_string(),
            (None, Some(number)) => number.clone(),
            (None, None) => unreachable!("constructor enforces at least one field"),
        }
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.uuid.map(|u| u.to_string()).as_deref().unwrap_or("-"),
            self.number.as_deref().unwrap_or("-")
        )
    }
}

/// Normalize a phone number to E.164 format.
pub fn normalize_number(number: &str) -> Result<String, StorageError> {
    let has_plus = number.starts_with('+');
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(StorageError::InvalidNumber(
            "must contain at least one digit".into(),
        ));
    }
    if digits.len() < 7 {
        return Err(StorageError::InvalidNumber("number too short".into()));
    }
    if digits.len() > 15 {
        return Err(StorageError::InvalidNumber("number too long".into()));
    }

    if has_plus || digits.len() >= 10 {
        Ok(format!("+{digits}"))
    } else {
        Err(StorageError::InvalidNumber(
            "number must include a country code".into(),
        ))
    }
}
