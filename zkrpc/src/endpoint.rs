// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Endpoint is the address record a live server publishes for discovery.

use std::fmt;

/// One live server instance, as published under the service node.
///
/// The payload stored in the coordination tree is UTF-8 JSON of the form
/// `{"host": "10.0.0.7", "port": 50051}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub struct Endpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Decodes the JSON payload of an endpoint node.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Encodes the endpoint as a node payload.
    pub fn to_payload(&self) -> Vec<u8> {
        // A struct of a string and an integer always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Returns `host:port`.
    #[inline]
    pub fn address(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::Endpoint;

    #[test]
    fn test_from_payload() {
        let endpoint = Endpoint::from_payload(br#"{"host": "h1", "port": 7000}"#).unwrap();
        assert_eq!(endpoint, Endpoint::new("h1", 7000));
        assert_eq!(endpoint.address(), "h1:7000");
    }

    #[test]
    fn test_from_bad_payload() {
        assert!(Endpoint::from_payload(b"h1:7000").is_err());
        assert!(Endpoint::from_payload(br#"{"host": "h1"}"#).is_err());
        assert!(Endpoint::from_payload(br#"{"host": "h1", "port": 70000}"#).is_err());
    }

    #[test]
    fn test_payload_is_json_object() {
        let payload = Endpoint::new("10.0.0.7", 50051).to_payload();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value, serde_json::json!({"host": "10.0.0.7", "port": 50051}));
    }
}
