//! Proof-of-concept Arrowhead configuration system core.
//!
//! Two loosely coupled halves:
//!
//! * a DNS/DNS-SD client stack — wire codec ([`dns`]), dual-transport
//!   resolver socket ([`resolver`]), transaction signing ([`tsig`]) and
//!   service discovery with dynamic update ([`sd`]);
//! * a configuration directory — a hierarchical path-indexed store over an
//!   embedded key/value engine ([`dir`]), value serialization ([`apes`]),
//!   and a template/document/patch validation layer ([`acml`]) composed into
//!   the [`store`] service.
//!
//! Everything is written for a single-threaded cooperative runtime; socket
//! tasks are returned to the caller to spawn, in the style of
//! `tokio::task::spawn_local`.

pub mod acml;
pub mod apes;
pub mod dir;
pub mod dns;
pub mod resolver;
pub mod sd;
pub mod store;
pub mod tsig;

pub use acml::{AcmlError, Document, Patch, Report, Template, Violation};
pub use apes::ApesError;
pub use dir::{Directory, DirectoryError, DirectoryStore};
pub use dns::{DnsError, Message, Name};
pub use resolver::{ResolverError, ResolverOptions, ResolverSocket, ResolverTask};
pub use sd::{SdError, ServiceDiscovery, ServiceRecord};
pub use store::{ConfigStore, StoreError};
pub use tsig::{Algorithm, TsigSigner};
