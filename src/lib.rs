//! autocert-proxy: Forward HTTP/HTTPS proxy with automatic certificates
//!
//! This crate provides a forward proxy that clients reach over TLS. The
//! certificate for its single public hostname is obtained and renewed from an
//! ACME certificate authority; proxy clients authenticate with
//! `Proxy-Authorization: Basic` before any tunnel or forward is allowed.
//!
//! # Architecture
//!
//! - **Proxy**: Auth gate, CONNECT tunnel engine, HTTP forwarder and the dual
//!   listener bootstrap
//! - **Certs**: Boundary to the certificate collaborator (ACME via `rustls-acme`)
//! - **Config**: Layered TOML / environment / CLI configuration

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod certs;
pub mod cli;
pub mod config;
pub mod proxy;
