#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # bdsync-maas
//!
//! MAAS REST backend for bdsync.
//!
//! Provides [`MaasClient`], an implementation of
//! [`bdsync_core::RemoteClient`] that talks to the MAAS 2.0 API, and
//! [`MaasConfig`], the connection settings with a `BDSYNC_MAAS_*`
//! environment overlay.
//!
//! ## Example
//!
//! ```ignore
//! use bdsync_maas::{MaasClient, MaasConfig};
//!
//! let config = MaasConfig::with_url("http://maas.example:5240/MAAS/".parse()?).apply_env();
//! let client = MaasClient::with_config(config)?;
//! let machine = client.find_machine("m1.maas").await?;
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::MaasClient;
pub use config::{ENV_AUTHORIZATION, ENV_TIMEOUT, ENV_URL, MaasConfig};
pub use error::{Error, Result};
