//! Device-authorization grant types

use serde::{Deserialize, Serialize};

fn default_interval() -> u64 {
    5
}

/// The issuer's answer to a device-authorization request.
///
/// `verification_url` is accepted as an alias because Google spells the
/// field that way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceCode {
    /// Opaque code the client polls the token endpoint with.
    pub device_code: String,
    /// Short code the user types at the verification uri.
    pub user_code: String,
    /// Where the user authorizes the device.
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    /// Verification uri with the user code already embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_uri_complete: Option<String>,
    /// Minimum seconds between polls. Defaults to 5 when absent.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Lifetime of the device code in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn google_spelling_and_interval_default() {
        let dc: DeviceCode = serde_json::from_str(
            r#"{"device_code":"d","user_code":"ABCD","verification_url":"https://idp/device"}"#,
        )
        .unwrap();
        assert_eq!(dc.verification_uri, "https://idp/device");
        assert_eq!(dc.interval, 5);
    }
}
