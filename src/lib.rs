//! Observable cells whose values may come from asynchronous sources.
//!
//! Every cell can be read synchronously and subscribed to. Cells backed by a
//! loader additionally advertise [`Capabilities`], and `load`/`reload`
//! travel through the whole dependency graph so a dependent resolves only
//! once its ancestors have settled.
//!
//! Everything here is single-threaded. Cells that load in the background
//! when observed spawn onto the current [`tokio::task::LocalSet`].

pub mod macros;

mod async_derived;
mod async_writable;
mod batch;
mod dependencies;
mod derived;
mod error;
mod hashed;
mod options;
mod readable;
mod subscription;
mod writable;

pub use async_derived::{async_derived, async_readable, AsyncDerived};
pub use async_writable::{async_writable, AsyncWritable};
pub use batch::{batch, in_batch};
pub use dependencies::{
	any_loadable, any_reloadable, load_all, normalize, reload_all, safe_load, Dependencies,
};
pub use derived::{derived, Derived};
pub use error::Error;
pub use options::Options;
pub use readable::{get, is_loadable, is_reloadable, Capabilities, LoadFuture, Probe, Readable, Store};
pub use subscription::{Subscription, Subscriptions};
pub use writable::{readable, writable, Writable};
