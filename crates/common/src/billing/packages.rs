//! Credit packages offered at checkout

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PackageType {
    Small,
    Medium,
    Large,
}

impl PackageType {
    pub const ALL: [PackageType; 3] = [PackageType::Small, PackageType::Medium, PackageType::Large];

    /// Credits granted on payment
    pub fn credits(&self) -> i32 {
        match self {
            PackageType::Small => 10,
            PackageType::Medium => 50,
            PackageType::Large => 100,
        }
    }

    /// Price in USD cents
    pub fn price_cents(&self) -> i64 {
        match self {
            PackageType::Small => 500,
            PackageType::Medium => 2000,
            PackageType::Large => 3500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Small => "SMALL",
            PackageType::Medium => "MEDIUM",
            PackageType::Large => "LARGE",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        PackageType::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| AppError::validation("packageType", "Invalid package type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_table() {
        assert_eq!(PackageType::Small.credits(), 10);
        assert_eq!(PackageType::Small.price_cents(), 500);
        assert_eq!(PackageType::Medium.credits(), 50);
        assert_eq!(PackageType::Medium.price_cents(), 2000);
        assert_eq!(PackageType::Large.credits(), 100);
        assert_eq!(PackageType::Large.price_cents(), 3500);
    }

    #[test]
    fn test_parse() {
        assert_eq!("MEDIUM".parse::<PackageType>().unwrap(), PackageType::Medium);
        assert!("medium".parse::<PackageType>().is_err());
        assert!("HUGE".parse::<PackageType>().is_err());
    }
}
