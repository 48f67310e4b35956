//! Request and signing-configuration documents in the JSON shapes used by `cfssl`, so that the
//! in-process backend consumes exactly the same rendered templates as the external one.

use crate::backend::BackendError;
use rcgen::{
    DistinguishedName, DnType, ExtendedKeyUsagePurpose, KeyUsagePurpose, SignatureAlgorithm,
};
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

/// Lifetime of a root certificate whose request does not specify `ca.expiry`.
const DEFAULT_CA_EXPIRY: Duration = Duration::from_secs(43_800 * 3600);
/// Lifetime of a leaf certificate whose profile and default both omit `expiry`.
const DEFAULT_EXPIRY: Duration = Duration::from_secs(168 * 3600);

#[derive(Debug, Deserialize)]
pub(crate) struct CsrRequest {
    #[serde(rename = "CN", default)]
    pub common_name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub key: KeyRequest,
    #[serde(default)]
    pub names: Vec<NameEntry>,
    #[serde(default)]
    pub ca: Option<CaConfig>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyRequest {
    #[serde(default = "KeyRequest::default_algo")]
    pub algo: String,
    #[serde(default)]
    pub size: u32,
}

impl KeyRequest {
    fn default_algo() -> String {
        "ecdsa".to_owned()
    }

    pub fn algorithm(&self) -> Result<&'static SignatureAlgorithm, BackendError> {
        match (self.algo.as_str(), self.size) {
            ("ecdsa", 0 | 256) => Ok(&rcgen::PKCS_ECDSA_P256_SHA256),
            ("ecdsa", 384) => Ok(&rcgen::PKCS_ECDSA_P384_SHA384),
            ("ed25519", _) => Ok(&rcgen::PKCS_ED25519),
            (algo, size) => Err(BackendError::failed(format!(
                "unsupported key algorithm {algo} with size {size}"
            ))),
        }
    }
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self {
            algo: Self::default_algo(),
            size: 256,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NameEntry {
    #[serde(rename = "C")]
    pub country: Option<String>,
    #[serde(rename = "ST")]
    pub state: Option<String>,
    #[serde(rename = "L")]
    pub locality: Option<String>,
    #[serde(rename = "O")]
    pub organization: Option<String>,
    #[serde(rename = "OU")]
    pub organizational_unit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CaConfig {
    pub expiry: Option<String>,
}

impl CsrRequest {
    pub fn parse(document: &[u8]) -> Result<Self, BackendError> {
        serde_json::from_slice(document)
            .map_err(|e| BackendError::failed(format!("malformed request document: {e}")))
    }

    /// Subject name built from `CN` and the first entry of `names`. Empty fields are skipped.
    pub fn distinguished_name(&self) -> DistinguishedName {
        let mut name = DistinguishedName::new();

        if let Some(entry) = self.names.first() {
            let fields = [
                (DnType::CountryName, &entry.country),
                (DnType::StateOrProvinceName, &entry.state),
                (DnType::LocalityName, &entry.locality),
                (DnType::OrganizationName, &entry.organization),
                (DnType::OrganizationalUnitName, &entry.organizational_unit),
            ];

            for (ty, value) in fields {
                if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                    name.push(ty, value);
                }
            }
        }

        if !self.common_name.is_empty() {
            name.push(DnType::CommonName, self.common_name.as_str());
        }

        name
    }

    pub fn ca_expiry(&self) -> Result<Duration, BackendError> {
        match self.ca.as_ref().and_then(|ca| ca.expiry.as_deref()) {
            Some(expiry) => parse_expiry(expiry),
            None => Ok(DEFAULT_CA_EXPIRY),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SigningConfig {
    pub signing: Signing,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Signing {
    #[serde(default)]
    pub default: Option<SigningProfile>,
    #[serde(default)]
    pub profiles: HashMap<String, SigningProfile>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub(crate) struct SigningProfile {
    pub expiry: Option<String>,
    #[serde(default)]
    pub usages: Vec<String>,
}

/// Expiry and usages resolved for one signing operation.
#[derive(Debug, PartialEq)]
pub(crate) struct ResolvedProfile {
    pub expiry: Duration,
    pub key_usages: Vec<KeyUsagePurpose>,
    pub extended_key_usages: Vec<ExtendedKeyUsagePurpose>,
}

impl SigningConfig {
    pub fn parse(document: &[u8]) -> Result<Self, BackendError> {
        serde_json::from_slice(document)
            .map_err(|e| BackendError::failed(format!("malformed signing config: {e}")))
    }

    /// Looks up `name` in the configured profiles. Fields missing from the profile fall back to
    /// the `default` section.
    pub fn profile(&self, name: &str) -> Result<ResolvedProfile, BackendError> {
        let profile = self
            .signing
            .profiles
            .get(name)
            .ok_or_else(|| BackendError::failed(format!("unknown signing profile {name}")))?;
        let default = self.signing.default.clone().unwrap_or_default();

        let expiry = match profile.expiry.as_deref().or(default.expiry.as_deref()) {
            Some(expiry) => parse_expiry(expiry)?,
            None => DEFAULT_EXPIRY,
        };

        let usages = if profile.usages.is_empty() {
            &default.usages
        } else {
            &profile.usages
        };

        let mut key_usages = Vec::new();
        let mut extended_key_usages = Vec::new();
        for usage in usages {
            match usage.as_str() {
                "signing" | "digital signature" => {
                    key_usages.push(KeyUsagePurpose::DigitalSignature)
                }
                "content commitment" => key_usages.push(KeyUsagePurpose::ContentCommitment),
                "key encipherment" => key_usages.push(KeyUsagePurpose::KeyEncipherment),
                "key agreement" => key_usages.push(KeyUsagePurpose::KeyAgreement),
                "data encipherment" => key_usages.push(KeyUsagePurpose::DataEncipherment),
                "cert sign" => key_usages.push(KeyUsagePurpose::KeyCertSign),
                "crl sign" => key_usages.push(KeyUsagePurpose::CrlSign),
                "encipher only" => key_usages.push(KeyUsagePurpose::EncipherOnly),
                "decipher only" => key_usages.push(KeyUsagePurpose::DecipherOnly),
                "any" => extended_key_usages.push(ExtendedKeyUsagePurpose::Any),
                "server auth" => extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth),
                "client auth" => extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth),
                "code signing" => extended_key_usages.push(ExtendedKeyUsagePurpose::CodeSigning),
                "email protection" => {
                    extended_key_usages.push(ExtendedKeyUsagePurpose::EmailProtection)
                }
                "timestamping" => extended_key_usages.push(ExtendedKeyUsagePurpose::TimeStamping),
                "ocsp signing" => extended_key_usages.push(ExtendedKeyUsagePurpose::OcspSigning),
                other => {
                    return Err(BackendError::failed(format!("unknown key usage {other}")));
                }
            }
        }

        Ok(ResolvedProfile {
            expiry,
            key_usages,
            extended_key_usages,
        })
    }
}

fn parse_expiry(expiry: &str) -> Result<Duration, BackendError> {
    humantime::parse_duration(expiry)
        .map_err(|e| BackendError::failed(format!("invalid expiry {expiry}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "signing": {
            "default": { "expiry": "168h" },
            "profiles": {
                "www": {
                    "expiry": "720h",
                    "usages": ["signing", "key encipherment", "server auth"]
                },
                "client": { "usages": ["client auth"] }
            }
        }
    }"#;

    #[test]
    fn resolves_profile() {
        let config = SigningConfig::parse(CONFIG.as_bytes()).unwrap();

        let profile = config.profile("www").unwrap();

        assert_eq!(profile.expiry, Duration::from_secs(720 * 3600));
        assert_eq!(
            profile.key_usages,
            vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment
            ]
        );
        assert_eq!(
            profile.extended_key_usages,
            vec![ExtendedKeyUsagePurpose::ServerAuth]
        );
    }

    #[test]
    fn profile_falls_back_to_default_expiry() {
        let config = SigningConfig::parse(CONFIG.as_bytes()).unwrap();
        assert_eq!(
            config.profile("client").unwrap().expiry,
            Duration::from_secs(168 * 3600)
        );
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let config = SigningConfig::parse(CONFIG.as_bytes()).unwrap();
        assert!(config.profile("peer").is_err());
    }

    #[test]
    fn parses_request_with_defaults() {
        let request = CsrRequest::parse(
            br#"{"CN": "svc1.internal", "names": [{"O": "TAP", "OU": ""}]}"#,
        )
        .unwrap();

        assert_eq!(request.common_name, "svc1.internal");
        assert!(request.key.algorithm().is_ok());
        assert_eq!(request.ca_expiry().unwrap(), DEFAULT_CA_EXPIRY);
        assert!(request.hosts.is_empty());
    }

    #[test]
    fn rejects_rsa_keys() {
        let request =
            CsrRequest::parse(br#"{"CN": "x", "key": {"algo": "rsa", "size": 2048}}"#).unwrap();
        assert!(request.key.algorithm().is_err());
    }
}
