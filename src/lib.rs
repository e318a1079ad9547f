//! smesh - transport and routing core for a low-power sensor mesh.
//!
//! Nodes self-organize into a tree rooted at a gateway: each node keeps
//! a parent (next hop toward the gateway) and its hop distance, and
//! repeaters additionally learn reverse routes into their subtree. The
//! same core drives every role; capabilities (repeater, gateway, message
//! signing, OTA firmware updates) are runtime configuration.
//!
//! The crate is transport-agnostic: the radio link, persistent store,
//! clock, signing provider, controller transport and firmware flash are
//! all trait seams supplied by the embedder.
//!
//! # Example
//!
//! ```no_run
//! use smesh::config::Config;
//! use smesh::link::SystemClock;
//! use smesh::node::Node;
//! use smesh::storage::MemStorage;
//! # struct NoLink;
//! # impl smesh::link::WireLink for NoLink {
//! #     fn set_address(&mut self, _: u8) {}
//! #     fn available(&mut self) -> Option<u8> { None }
//! #     fn receive(&mut self, _: &mut [u8]) -> usize { 0 }
//! #     fn send(&mut self, _: u8, _: &[u8]) -> bool { false }
//! # }
//!
//! let mut node = Node::new(
//!     Config::repeater(),
//!     Box::new(NoLink),
//!     Box::new(MemStorage::new()),
//!     Box::new(SystemClock),
//! );
//! node.start();
//! loop {
//!     node.process();
//! }
//! ```

pub mod config;
pub mod context;
pub mod firmware;
pub mod gateway;
pub mod link;
pub mod message;
pub mod node;
pub mod routing;
pub mod signing;
pub mod storage;

pub use config::Config;
pub use message::Message;
pub use node::Node;
