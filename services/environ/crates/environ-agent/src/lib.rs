//! Environ node agent.
//!
//! Listens on Valkey pub/sub for `env.*` events addressed to this node,
//! edits the local env file in place and runs shell commands on request.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod bus;
pub mod dispatcher;
pub mod envfile;
pub mod error;
pub mod exec;
pub mod fs;
pub mod inbox;
pub mod locks;
pub mod store;

pub use dispatcher::{Dispatcher, NodeIdentity};
pub use error::{BusError, ExecError, StoreError};
pub use exec::{CommandRunner, ExecPolicy, Shell, ShellRunner};
pub use fs::{FileSystem, TokioFs};
pub use inbox::{Delivery, Inbox, Request};
pub use store::ConfigStore;
