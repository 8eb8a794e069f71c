use std::hash::Hash;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};

use crate::dependencies::{any_loadable, any_reloadable, resolve, Dependencies, Resolve};
use crate::readable::{Capabilities, LoadFuture, Readable, Store};
use crate::{Error, Subscription, Subscriptions, Writable};

/// A synchronous derivation over its parents which still takes part in
/// `load`/`reload` when some ancestor is asynchronous.
pub struct Derived<T> {
	body: Rc<DerivedBody<T>>,
}

impl<T> Clone for Derived<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

struct DerivedBody<T> {
	store: Writable<T>,
	source: Box<dyn Derivation<T>>,
	capabilities: Capabilities,
}

trait Derivation<T>: 'static {
	fn compute(&self) -> T;
	fn resolve(&self, mode: Resolve) -> LocalBoxFuture<'static, Result<(), Error>>;
	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions;
}

struct MappedDerivation<D, F> {
	deps: D,
	func: F,
}

impl<D, F, T> Derivation<T> for MappedDerivation<D, F>
where
	D: Dependencies,
	F: Fn(D::Values) -> T + 'static,
{
	fn compute(&self) -> T {
		(self.func)(self.deps.snapshot())
	}

	fn resolve(&self, mode: Resolve) -> LocalBoxFuture<'static, Result<(), Error>> {
		resolve(&self.deps, mode)
	}

	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
		self.deps.subscribe_changes(listener)
	}
}

pub fn derived<D, T, F>(deps: D, func: F) -> Derived<T>
where
	D: Dependencies,
	T: Clone + Hash + 'static,
	F: Fn(D::Values) -> T + 'static,
{
	Derived::new(deps, func)
}

impl<T> Derived<T>
where
	T: Clone + Hash + 'static,
{
	pub fn new<D, F>(deps: D, func: F) -> Self
	where
		D: Dependencies,
		F: Fn(D::Values) -> T + 'static,
	{
		let capabilities = Capabilities {
			load: any_loadable(&deps),
			reload: any_reloadable(&deps),
		};
		let source = MappedDerivation { deps, func };
		let initial: T = source.compute();

		Derived {
			body: Rc::new_cyclic(|this: &Weak<DerivedBody<T>>| {
				let this = this.clone();
				DerivedBody {
					store: Writable::with_start(initial, move |_| match this.upgrade() {
						Some(body) => body.start(),
						None => Subscriptions::new(),
					}),
					source: Box::new(source),
					capabilities,
				}
			}),
		}
	}

	/// While observed the value is kept current by parent notifications,
	/// otherwise it is recomputed on every call.
	pub fn get(&self) -> T {
		if self.body.store.is_observed() {
			self.body.store.get()
		} else {
			self.body.refresh()
		}
	}

	/// Subscribing also subscribes to the parents.
	///
	/// # Panics
	///
	/// When an async ancestor is not observed yet, its first subscription
	/// spawns a background derivation and panics outside of a
	/// [`tokio::task::LocalSet`].
	pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
		self.body.store.subscribe(listener)
	}

	pub fn capabilities(&self) -> Capabilities {
		self.body.capabilities
	}

	pub fn load(&self) -> LoadFuture<T> {
		self.body.clone().resolved(Resolve::Load)
	}

	pub fn reload(&self) -> LoadFuture<T> {
		self.body.clone().resolved(Resolve::Reload)
	}
}

impl<T> DerivedBody<T>
where
	T: Clone + Hash + 'static,
{
	fn start(self: &Rc<Self>) -> Subscriptions {
		self.refresh();

		let this = Rc::downgrade(self);
		self.source.subscribe_changes(Rc::new(move || {
			if let Some(body) = this.upgrade() {
				body.refresh();
			}
		}))
	}

	fn refresh(&self) -> T {
		let value = self.source.compute();
		self.store.set(value.clone());
		value
	}

	/// Waits for the parents, then recomputes from their settled values.
	fn resolved(self: Rc<Self>, mode: Resolve) -> LoadFuture<T> {
		let parents = self.source.resolve(mode);
		async move {
			parents.await?;
			Ok(self.refresh())
		}
		.boxed_local()
	}
}

impl<T> Readable for Derived<T>
where
	T: Clone + Hash + 'static,
{
	type Value = T;

	fn get(&self) -> T {
		Derived::get(self)
	}

	fn subscribe(&self, listener: Box<dyn Fn(&T)>) -> Subscription {
		Derived::subscribe(self, listener)
	}

	fn capabilities(&self) -> Capabilities {
		Derived::capabilities(self)
	}

	fn load(&self) -> LoadFuture<T> {
		Derived::load(self)
	}

	fn reload(&self) -> LoadFuture<T> {
		Derived::reload(self)
	}
}

impl<T> From<Derived<T>> for Store<T>
where
	T: Clone + Hash + 'static,
{
	fn from(cell: Derived<T>) -> Self {
		Store::new(cell)
	}
}

impl<T> std::fmt::Debug for Derived<T>
where
	T: Clone + Hash + std::fmt::Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Derived")
			.field("value", &self.body.store.get())
			.field("capabilities", &self.body.capabilities)
			.finish()
	}
}
