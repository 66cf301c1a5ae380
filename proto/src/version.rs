use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// An API version of the form `vMAJOR.MINOR`, e.g. `v1.2`.
///
/// Ordering is numeric on the two components, so `v1.10 > v1.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed API version {0:?}, expected \"vMAJOR.MINOR\"")]
pub struct ParseVersionError(pub String);

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion { major: 1, minor: 0 };
    pub const V1_1: ApiVersion = ApiVersion { major: 1, minor: 1 };
    pub const V1_2: ApiVersion = ApiVersion { major: 1, minor: 2 };

    /// Every version this build of the fabric speaks, lowest first.
    pub const SUPPORTED: [ApiVersion; 3] = [Self::V1_0, Self::V1_1, Self::V1_2];

    pub fn highest() -> ApiVersion { Self::V1_2 }

    pub fn is_supported(&self) -> bool { Self::SUPPORTED.contains(self) }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "v{}.{}", self.major, self.minor) }
}

impl std::str::FromStr for ApiVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseVersionError(s.to_string());
        let rest = s.strip_prefix('v').ok_or_else(err)?;
        let (major, minor) = rest.split_once('.').ok_or_else(err)?;
        Ok(ApiVersion { major: major.parse().map_err(|_| err())?, minor: minor.parse().map_err(|_| err())? })
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> { serializer.collect_str(self) }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
