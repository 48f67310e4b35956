#![cfg_attr(docsrs, feature(doc_cfg))]

//! Keystone is a minimal certificate authority that:
//!
//! - Bootstraps a self-signed root CA once and persists it on disk
//! - Issues leaf certificates and keys for service host names
//! - Serves the root certificate, its fingerprint and a trust bundle over an authenticated HTTP API
//!
//! Key generation and signing are delegated to a [`SigningBackend`](backend::SigningBackend),
//! either in-process or by running `cfssl`. Fingerprints come from a
//! [`DigestCapability`](digest::DigestCapability).
//!
//! ## Features
//!
//! - `full`: Enables all features.
//! - `openssl-digest`: Enables [`digest::OpensslSubjectHash`].
//! - `rcgen-backend`: Enables [`backend::RcgenBackend`] (enabled by default).

mod command;
mod error;

pub mod api;
pub mod authority;
pub mod backend;
pub mod config;
pub mod digest;
pub mod store;
pub mod template;

#[cfg(feature = "openssl-digest")]
pub use openssl;
#[cfg(feature = "rcgen-backend")]
pub use rcgen;

pub use api::ApiServer;
pub use authority::{BootstrapOutcome, CaEngine, CertificateAuthority, IssuedCertificate};
pub use config::{ApiSettings, CaSettings, Config};
pub use error::Error;
