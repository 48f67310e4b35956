//! Process configuration.
//!
//! [`Config`] is parsed once at startup from command line flags, falling back to environment
//! variables and then to defaults. Components receive the slice of it they need by reference.

use clap::{Parser, ValueEnum};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

pub const DEFAULT_ORGANIZATION: &str = "TAP";
pub const DEFAULT_PROFILE: &str = "www";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum BackendKind {
    /// Sign in-process with rcgen.
    #[default]
    Rcgen,
    /// Run the cfssl command line tool.
    Cfssl,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DigestKind {
    /// SHA-256 over the DER encoded certificate.
    #[default]
    Sha256,
    /// Subject hash printed by `openssl x509 -hash`.
    SubjectHash,
    /// Subject hash computed with the linked OpenSSL library.
    Openssl,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct Config {
    /// Organization written into certificate subjects.
    #[arg(long, env = "ORG", default_value = DEFAULT_ORGANIZATION)]
    pub organization: String,

    /// Username for HTTP basic authentication.
    #[arg(long, env = "CA_USER")]
    pub username: String,

    /// Password for HTTP basic authentication.
    #[arg(long, env = "CA_PASS", hide_env_values = true)]
    pub password: String,

    #[arg(long, env = "BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory holding the persisted CA state.
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding the request templates.
    #[arg(long, env = "TEMPLATES_DIR", default_value = "templates")]
    pub templates_dir: PathBuf,

    #[arg(long, env = "SIGNING_BACKEND", value_enum, default_value_t)]
    pub backend: BackendKind,

    /// Path to the cfssl executable, used with `--backend cfssl`.
    #[arg(long, env = "CFSSL_PATH", default_value = "./cfssl")]
    pub cfssl_path: PathBuf,

    #[arg(long, env = "DIGEST", value_enum, default_value_t)]
    pub digest: DigestKind,

    /// Path to the openssl executable, used with `--digest subject-hash`.
    #[arg(long, env = "OPENSSL_PATH", default_value = "/usr/bin/openssl")]
    pub openssl_path: PathBuf,

    /// Upper bound for a single signing or digest invocation.
    #[arg(long, env = "BACKEND_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub backend_timeout: Duration,

    /// Signing profile used for leaf certificates.
    #[arg(long, env = "SIGNING_PROFILE", default_value = DEFAULT_PROFILE)]
    pub profile: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn ca_settings(&self) -> CaSettings {
        CaSettings {
            organization: self.organization.clone(),
            data_dir: self.data_dir.clone(),
            templates_dir: self.templates_dir.clone(),
            profile: self.profile.clone(),
            backend_timeout: self.backend_timeout,
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// Settings consumed by [`CertificateAuthority`](crate::CertificateAuthority).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CaSettings {
    pub organization: String,
    pub data_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub profile: String,
    pub backend_timeout: Duration,
}

impl CaSettings {
    /// Settings with default organization, profile and timeout.
    pub fn new(data_dir: impl Into<PathBuf>, templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            organization: DEFAULT_ORGANIZATION.to_owned(),
            data_dir: data_dir.into(),
            templates_dir: templates_dir.into(),
            profile: DEFAULT_PROFILE.to_owned(),
            backend_timeout: Duration::from_secs(30),
        }
    }
}

/// Credentials required by the authenticated API routes.
#[derive(Clone, Eq, PartialEq)]
pub struct ApiSettings {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Config::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::try_parse_from([
            "keystone-ca",
            "--username",
            "user",
            "--password",
            "secret",
            "--organization",
            "Example",
            "--port",
            "9000",
            "--backend",
            "cfssl",
            "--digest",
            "subject-hash",
            "--backend-timeout",
            "5s",
        ])
        .unwrap();

        assert_eq!(config.organization, "Example");
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.backend, BackendKind::Cfssl);
        assert_eq!(config.digest, DigestKind::SubjectHash);
        assert_eq!(config.backend_timeout, Duration::from_secs(5));
        assert_eq!(config.ca_settings().profile, DEFAULT_PROFILE);
    }

    #[test]
    fn password_is_not_logged() {
        let settings = ApiSettings {
            username: "user".to_owned(),
            password: "secret".to_owned(),
        };
        assert!(!format!("{settings:?}").contains("secret"));
    }
}
