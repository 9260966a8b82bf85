//! # BluFi Provisioner
//!
//! Async host glue around [`blufi_protocol`]: configuration, logging setup,
//! a pluggable byte [`Transport`], a [`CredentialStore`], and the
//! [`Provisioner`] that drives one device connection from negotiation to
//! station credentials.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blufi_provisioner::{ChannelTransport, Config, MemoryCredentialStore, Provisioner, WifiCredentials};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     blufi_provisioner::logging::init_logging(&config.logging.level, false)?;
//!
//!     // A real host wraps its BLE characteristic pair in a Transport.
//!     let (transport, _device) = ChannelTransport::pair(32);
//!     let mut provisioner = Provisioner::from_config(transport, &config)?;
//!
//!     let store = MemoryCredentialStore::with_fallback(WifiCredentials::new("home", "secret"));
//!     provisioner.negotiate().await?;
//!     provisioner.provision("esp32-kitchen", &store).await?;
//!     println!("{:?}", provisioner.device_info().await?);
//!     provisioner.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod logging;
pub mod provisioner;
pub mod transport;

pub use config::{Config, ConfigError, LoggingConfig, ProvisioningConfig};
pub use credentials::{CredentialError, CredentialStore, MemoryCredentialStore, WifiCredentials};
pub use provisioner::{ProvisionError, Provisioner};
pub use transport::{ChannelTransport, Transport, TransportError};
