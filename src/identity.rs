// Student identity - the (student name, parent phone) pair that joins remote
// records to local students.
//
// Kintone stores it as one composite string "name/phone". The composite only
// exists at the remote boundary; everything in-process carries StudentIdentity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub student_name: String,
    pub parent_phone: String,
}

impl StudentIdentity {
    pub fn new(student_name: impl Into<String>, parent_phone: impl Into<String>) -> Self {
        Self {
            student_name: student_name.into(),
            parent_phone: parent_phone.into(),
        }
    }

    /// Parse a `"name/phone"` composite.
    ///
    /// Exactly one separator is allowed and neither side may be empty. Parts are
    /// kept byte-for-byte so the composite sent back out matches the remote key.
    pub fn parse(composite: &str) -> Result<Self, IdentityError> {
        let parts: Vec<&str> = composite.split(SEPARATOR).collect();
        if parts.len() != 2 {
            return Err(IdentityError::Malformed(composite.to_string()));
        }

        let (student_name, parent_phone) = (parts[0], parts[1]);
        if student_name.is_empty() || parent_phone.is_empty() {
            return Err(IdentityError::EmptyPart(composite.to_string()));
        }

        Ok(Self::new(student_name, parent_phone))
    }

    /// Build from separate name and phone fields, applying the same rules as `parse`
    pub fn try_new(student_name: &str, parent_phone: &str) -> Result<Self, IdentityError> {
        if student_name.contains(SEPARATOR) || parent_phone.contains(SEPARATOR) {
            return Err(IdentityError::Malformed(format!(
                "{}{}{}",
                student_name, SEPARATOR, parent_phone
            )));
        }
        Self::parse(&format!("{}{}{}", student_name, SEPARATOR, parent_phone))
    }

    pub fn compose(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StudentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.student_name, SEPARATOR, self.parent_phone)
    }
}

impl std::str::FromStr for StudentIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
