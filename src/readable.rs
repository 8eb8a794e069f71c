use std::hash::Hash;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::{Error, Subscription};

/// The eventual outcome of loading a cell.
pub type LoadFuture<T> = LocalBoxFuture<'static, Result<T, Error>>;

/// What a particular cell instance can do beyond being read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
	pub load: bool,
	pub reload: bool,
}

impl Capabilities {
	pub const NONE: Capabilities = Capabilities {
		load: false,
		reload: false,
	};
	pub const LOAD: Capabilities = Capabilities {
		load: true,
		reload: false,
	};
	pub const RELOAD: Capabilities = Capabilities {
		load: true,
		reload: true,
	};
}

pub trait Readable: 'static {
	type Value: Clone + Hash + 'static;

	/// Current snapshot of the value.
	fn get(&self) -> Self::Value;

	/// Calls `listener` with the current value right away and then
	/// synchronously after every change.
	fn subscribe(&self, listener: Box<dyn Fn(&Self::Value)>) -> Subscription;

	fn capabilities(&self) -> Capabilities {
		Capabilities::NONE
	}

	/// Only meaningful when `capabilities().load` is set; otherwise resolves
	/// to the snapshot.
	fn load(&self) -> LoadFuture<Self::Value> {
		future::ready(Ok(self.get())).boxed_local()
	}

	fn reload(&self) -> LoadFuture<Self::Value> {
		self.load()
	}
}

/// Capability probe over any cell, regardless of its value type.
pub trait Probe {
	fn probe(&self) -> Capabilities;
}

impl<C: Readable> Probe for C {
	fn probe(&self) -> Capabilities {
		self.capabilities()
	}
}

pub fn is_loadable<C: Probe + ?Sized>(cell: &C) -> bool {
	cell.probe().load
}

pub fn is_reloadable<C: Probe + ?Sized>(cell: &C) -> bool {
	cell.probe().reload
}

pub fn get<C: Readable + ?Sized>(cell: &C) -> C::Value {
	cell.get()
}

/// A type-erased cell handle.
pub struct Store<T> {
	cell: Rc<dyn Readable<Value = T>>,
}

impl<T> Clone for Store<T> {
	fn clone(&self) -> Self {
		Store {
			cell: self.cell.clone(),
		}
	}
}

impl<T> Store<T>
where
	T: Clone + Hash + 'static,
{
	pub fn new(cell: impl Readable<Value = T>) -> Self {
		Store {
			cell: Rc::new(cell),
		}
	}
}

impl<T> Readable for Store<T>
where
	T: Clone + Hash + 'static,
{
	type Value = T;

	fn get(&self) -> T {
		self.cell.get()
	}

	fn subscribe(&self, listener: Box<dyn Fn(&T)>) -> Subscription {
		self.cell.subscribe(listener)
	}

	fn capabilities(&self) -> Capabilities {
		self.cell.capabilities()
	}

	fn load(&self) -> LoadFuture<T> {
		self.cell.load()
	}

	fn reload(&self) -> LoadFuture<T> {
		self.cell.reload()
	}
}

impl<T> std::fmt::Debug for Store<T>
where
	T: Clone + Hash + std::fmt::Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Store")
			.field("value", &self.cell.get())
			.field("capabilities", &self.cell.capabilities())
			.finish()
	}
}
