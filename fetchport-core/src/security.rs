//! Secret handling for database credentials.
//!
//! Passwords live in `Zeroizing` storage, print as `****` through `Debug`
//! and `Display`, and serialize masked so a request echoed back to a caller
//! never contains them.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

/// Placeholder written wherever a secret would otherwise appear.
pub const MASK: &str = "****";

/// A password that is zeroed on drop and never printed.
///
/// # Example
///
/// ```rust
/// use fetchport_core::security::SecretString;
///
/// let secret = SecretString::new("hunter2");
/// assert_eq!(secret.expose(), "hunter2");
/// assert_eq!(format!("{:?}", secret), "SecretString(****)");
/// ```
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    /// Wraps a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Returns the clear-text value. Only connection code should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Checks whether the secret is empty without exposing it.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({})", MASK)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(MASK)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}
