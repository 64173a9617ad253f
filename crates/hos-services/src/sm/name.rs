//! Service names

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SmError;

/// Maximum length of a service name.
pub const MAX_NAME_LEN: usize = 8;

/// A validated service name: 1 to 8 ASCII bytes, no NUL.
///
/// On the wire a name is a `u64` holding the bytes in little-endian order,
/// NUL padded.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: &str) -> Result<Self, SmError> {
        let valid = !name.is_empty()
            && name.len() <= MAX_NAME_LEN
            && name.bytes().all(|b| b.is_ascii() && b != 0);
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(SmError::InvalidName)
        }
    }

    /// Decode a wire name. Bytes after the first NUL must also be NUL.
    pub fn from_u64(raw: u64) -> Result<Self, SmError> {
        let bytes = raw.to_le_bytes();
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        if bytes[len..].iter().any(|&b| b != 0) {
            return Err(SmError::InvalidName);
        }
        let name = std::str::from_utf8(&bytes[..len]).map_err(|_| SmError::InvalidName)?;
        Self::new(name)
    }

    pub fn to_u64(&self) -> u64 {
        let mut bytes = [0u8; MAX_NAME_LEN];
        bytes[..self.0.len()].copy_from_slice(self.0.as_bytes());
        u64::from_le_bytes(bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = SmError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::new(&name)
    }
}

impl TryFrom<&str> for ServiceName {
    type Error = SmError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_limits() {
        assert!(ServiceName::new("set:sys").is_ok());
        assert!(ServiceName::new("12345678").is_ok());
        assert_eq!(ServiceName::new(""), Err(SmError::InvalidName));
        assert_eq!(ServiceName::new("123456789"), Err(SmError::InvalidName));
        assert_eq!(ServiceName::new("a\0b"), Err(SmError::InvalidName));
        assert_eq!(ServiceName::new("sé"), Err(SmError::InvalidName));
    }

    #[test]
    fn test_wire_form() {
        let name = ServiceName::new("ns:am").unwrap();
        let raw = name.to_u64();
        assert_eq!(raw & 0xFF, u64::from(b'n'));
        assert_eq!(ServiceName::from_u64(raw).unwrap(), name);
        assert_eq!(ServiceName::from_u64(0), Err(SmError::InvalidName));
        // Interior NUL followed by data.
        assert_eq!(
            ServiceName::from_u64(u64::from(b'a') | (u64::from(b'b') << 16)),
            Err(SmError::InvalidName)
        );
    }
}
