//! Selectable S3 endpoints and the region each one signs for.
//!
//! Every endpoint an instance may be configured with appears in [`ENDPOINTS`]
//! exactly once. Region resolution is a table lookup; nothing is derived from
//! the host name itself.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Endpoint used when an instance does not pick one.
pub const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

/// A regional S3 endpoint host and the signing region it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    host: &'static str,
    region: &'static str,
}

const ENDPOINTS: [Endpoint; 15] = [
    Endpoint::new("s3.amazonaws.com", "us-east-1"),
    Endpoint::new("s3-external-1.amazonaws.com", "us-east-1"),
    Endpoint::new("s3.us-east-2.amazonaws.com", "us-east-2"),
    Endpoint::new("s3-us-west-1.amazonaws.com", "us-west-1"),
    Endpoint::new("s3-us-west-2.amazonaws.com", "us-west-2"),
    Endpoint::new("s3.ca-central-1.amazonaws.com", "ca-central-1"),
    Endpoint::new("s3-eu-west-1.amazonaws.com", "eu-west-1"),
    Endpoint::new("s3.eu-west-2.amazonaws.com", "eu-west-2"),
    Endpoint::new("s3.eu-central-1.amazonaws.com", "eu-central-1"),
    Endpoint::new("s3-eu-central-1.amazonaws.com", "eu-central-1"),
    Endpoint::new("s3-ap-southeast-1.amazonaws.com", "ap-southeast-1"),
    Endpoint::new("s3-ap-southeast-2.amazonaws.com", "ap-southeast-2"),
    Endpoint::new("s3-ap-northeast-1.amazonaws.com", "ap-northeast-1"),
    Endpoint::new("s3.ap-south-1.amazonaws.com", "ap-south-1"),
    Endpoint::new("s3-sa-east-1.amazonaws.com", "sa-east-1"),
];

impl Endpoint {
    const fn new(host: &'static str, region: &'static str) -> Self {
        Self { host, region }
    }

    /// Look up an endpoint host, ignoring ASCII case and surrounding whitespace.
    pub fn parse(host: &str) -> Option<Self> {
        let host = host.trim();
        ENDPOINTS
            .iter()
            .find(|candidate| candidate.host.eq_ignore_ascii_case(host))
            .copied()
    }

    /// All selectable endpoints, in presentation order.
    pub fn all() -> &'static [Endpoint] {
        &ENDPOINTS
    }

    pub fn host(&self) -> &'static str {
        self.host
    }

    pub fn region(&self) -> &'static str {
        self.region
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        ENDPOINTS[0]
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.host)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Endpoint::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown endpoint `{}`", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn default_endpoint_maps_to_us_east_1() {
        let endpoint = Endpoint::default();
        assert_eq!(endpoint.host(), DEFAULT_ENDPOINT);
        assert_eq!(endpoint.region(), "us-east-1");
    }

    #[test]
    fn legacy_and_dotted_hosts_share_a_region() {
        let legacy = Endpoint::parse("s3-eu-central-1.amazonaws.com").unwrap();
        let dotted = Endpoint::parse("s3.eu-central-1.amazonaws.com").unwrap();
        assert_eq!(legacy.region(), "eu-central-1");
        assert_eq!(dotted.region(), "eu-central-1");
        assert_ne!(legacy, dotted);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let endpoint = Endpoint::parse("  S3-US-WEST-2.amazonaws.com ").unwrap();
        assert_eq!(endpoint.region(), "us-west-2");
    }

    #[test]
    fn unknown_hosts_are_rejected() {
        assert!(Endpoint::parse("s3.mars-north-1.amazonaws.com").is_none());
        assert!(Endpoint::parse("").is_none());
        assert!(Endpoint::parse("example.com").is_none());
    }

    #[test]
    fn table_has_unique_hosts_and_well_formed_regions() {
        let mut seen = HashSet::new();
        for endpoint in Endpoint::all() {
            assert!(seen.insert(endpoint.host()), "duplicate {}", endpoint);
            assert!(endpoint.host().ends_with(".amazonaws.com"));
            assert_eq!(endpoint.region().split('-').count(), 3);
        }
    }

    #[test]
    fn serde_uses_the_host_name() {
        let endpoint = Endpoint::parse("s3-sa-east-1.amazonaws.com").unwrap();
        let json = serde_json::to_string(&endpoint).unwrap();
        assert_eq!(json, "\"s3-sa-east-1.amazonaws.com\"");
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, endpoint);
        assert!(serde_json::from_str::<Endpoint>("\"nope\"").is_err());
    }
}
