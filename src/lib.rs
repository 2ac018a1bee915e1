//! Service-discovery client library over an etcd-style key-value store.
//!
//! A process registers itself as a named node under a service namespace
//! with a lease-bound lifetime ([`registration::RegistrationEngine`]),
//! lists peers under a namespace ([`query`]), and subscribes to
//! membership changes ([`watch`]). The store itself is an injected
//! dependency behind [`store::Store`] — this crate never dials a
//! transport on its own unless the optional `etcd` feature's
//! [`store::etcd::EtcdStore`] is used.

pub mod error;
pub mod node;
pub mod query;
pub mod registration;
pub mod settings;
pub mod store;
pub mod watch;

pub use error::Error;
pub use node::Node;
pub use registration::RegistrationEngine;
pub use settings::Settings;
pub use store::{Kv, Lease, Store};
pub use watch::Event;
