use std::future::Future;
use std::hash::Hash;

use crate::async_writable::boxed_load;
use crate::readable::{Capabilities, LoadFuture, Readable, Store};
use crate::{AsyncWritable, Dependencies, Options, Subscription};

/// Read-only view over an [`AsyncWritable`] without a write function.
pub struct AsyncDerived<T> {
	cell: AsyncWritable<T>,
}

impl<T> Clone for AsyncDerived<T> {
	fn clone(&self) -> Self {
		Self {
			cell: self.cell.clone(),
		}
	}
}

/// Loads a value asynchronously from the values of `deps`.
pub fn async_derived<D, T, L, F>(deps: D, load: L, options: Options<T>) -> AsyncDerived<T>
where
	D: Dependencies,
	T: Clone + Hash + Default + 'static,
	L: Fn(D::Values) -> F + 'static,
	F: Future<Output = anyhow::Result<T>> + 'static,
{
	AsyncDerived {
		cell: AsyncWritable::new(deps, load, options),
	}
}

/// A root cell backed by an asynchronous source and no parents.
pub fn async_readable<T, L, F>(initial: T, load: L, reloadable: bool) -> AsyncDerived<T>
where
	T: Clone + Hash + 'static,
	L: Fn() -> F + 'static,
	F: Future<Output = anyhow::Result<T>> + 'static,
{
	let mut options = Options::new();
	options.reloadable = reloadable;

	AsyncDerived {
		cell: AsyncWritable::from_parts((), boxed_load(move |()| load()), None, initial, &options),
	}
}

impl<T> AsyncDerived<T>
where
	T: Clone + Hash + 'static,
{
	#[inline]
	pub fn get(&self) -> T {
		self.cell.get()
	}

	/// # Panics
	///
	/// The first subscription spawns a background derivation and panics
	/// outside of a [`tokio::task::LocalSet`].
	pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
		self.cell.subscribe(listener)
	}

	pub fn capabilities(&self) -> Capabilities {
		self.cell.capabilities()
	}

	pub fn load(&self) -> LoadFuture<T> {
		self.cell.load()
	}

	pub fn reload(&self) -> LoadFuture<T> {
		self.cell.reload()
	}
}

impl<T> Readable for AsyncDerived<T>
where
	T: Clone + Hash + 'static,
{
	type Value = T;

	fn get(&self) -> T {
		AsyncDerived::get(self)
	}

	fn subscribe(&self, listener: Box<dyn Fn(&T)>) -> Subscription {
		AsyncDerived::subscribe(self, listener)
	}

	fn capabilities(&self) -> Capabilities {
		AsyncDerived::capabilities(self)
	}

	fn load(&self) -> LoadFuture<T> {
		AsyncDerived::load(self)
	}

	fn reload(&self) -> LoadFuture<T> {
		AsyncDerived::reload(self)
	}
}

impl<T> From<AsyncDerived<T>> for Store<T>
where
	T: Clone + Hash + 'static,
{
	fn from(cell: AsyncDerived<T>) -> Self {
		Store::new(cell)
	}
}

impl<T> std::fmt::Debug for AsyncDerived<T>
where
	T: Clone + Hash + std::fmt::Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		std::fmt::Debug::fmt(&self.cell, f)
	}
}
