use std::cell::Cell;
use std::hash::Hash;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use smallvec::{smallvec, SmallVec};

use crate::readable::{is_loadable, is_reloadable, LoadFuture, Probe, Readable};
use crate::{Error, Subscription, Subscriptions};

/// An ordered set of parent cells.
///
/// A bare cell hands its value to mapping functions as is, tuples hand over
/// a tuple, vectors a `Vec` and `()` nothing at all.
pub trait Dependencies: Clone + 'static {
	type Values: Clone + Hash + 'static;

	/// One capability probe per cell, in order.
	fn normalize(&self) -> SmallVec<[&dyn Probe; 4]>;

	fn snapshot(&self) -> Self::Values;

	fn load_all(&self) -> LoadFuture<Self::Values>;

	fn reload_all(&self) -> LoadFuture<Self::Values>;

	/// Subscribes `listener` to every cell. It is not called for the
	/// immediate first delivery, only for later changes.
	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resolve {
	Load,
	Reload,
}

pub(crate) fn resolve<D: Dependencies>(
	deps: &D,
	mode: Resolve,
) -> LocalBoxFuture<'static, Result<(), Error>> {
	let resolving = match mode {
		Resolve::Load => deps.load_all(),
		Resolve::Reload => deps.reload_all(),
	};
	resolving.map(|result| result.map(|_| ())).boxed_local()
}

pub fn normalize<D: Dependencies>(deps: &D) -> SmallVec<[&dyn Probe; 4]> {
	deps.normalize()
}

pub fn any_loadable<D: Dependencies>(deps: &D) -> bool {
	deps.normalize().iter().any(|cell| is_loadable(*cell))
}

pub fn any_reloadable<D: Dependencies>(deps: &D) -> bool {
	deps.normalize().iter().any(|cell| is_reloadable(*cell))
}

/// Resolves every cell, loading the loadable ones, and yields the values in
/// order. Cells resolve concurrently; the first failure wins.
pub fn load_all<D: Dependencies>(deps: &D) -> LoadFuture<D::Values> {
	deps.load_all()
}

/// Like [`load_all`], but reloads the cells that can be reloaded.
pub fn reload_all<D: Dependencies>(deps: &D) -> LoadFuture<D::Values> {
	deps.reload_all()
}

/// Loads `cell` and reports whether that succeeded instead of failing.
pub async fn safe_load<C: Readable>(cell: &C) -> bool {
	match load_one(cell).await {
		Ok(_) => true,
		Err(err) => {
			tracing::debug!(error = %err, "safe load failed");
			false
		}
	}
}

fn snapshot_one<C: Readable>(cell: &C) -> LoadFuture<C::Value> {
	future::ready(Ok(cell.get())).boxed_local()
}

pub(crate) fn load_one<C: Readable>(cell: &C) -> LoadFuture<C::Value> {
	if is_loadable(cell) {
		cell.load()
	} else {
		snapshot_one(cell)
	}
}

pub(crate) fn reload_one<C: Readable>(cell: &C) -> LoadFuture<C::Value> {
	if is_reloadable(cell) {
		cell.reload()
	} else {
		load_one(cell)
	}
}

fn on_change<C: Readable>(cell: &C, listener: Rc<dyn Fn()>) -> Subscription {
	let primed = Cell::new(false);
	cell.subscribe(Box::new(move |_: &C::Value| {
		if primed.replace(true) {
			listener()
		}
	}))
}

impl Dependencies for () {
	type Values = ();

	fn normalize(&self) -> SmallVec<[&dyn Probe; 4]> {
		SmallVec::new()
	}

	fn snapshot(&self) {}

	fn load_all(&self) -> LoadFuture<()> {
		future::ready(Ok(())).boxed_local()
	}

	fn reload_all(&self) -> LoadFuture<()> {
		self.load_all()
	}

	fn subscribe_changes(&self, _: Rc<dyn Fn()>) -> Subscriptions {
		Subscriptions::new()
	}
}

impl<C> Dependencies for C
where
	C: Readable + Clone,
{
	type Values = C::Value;

	fn normalize(&self) -> SmallVec<[&dyn Probe; 4]> {
		smallvec![self as &dyn Probe]
	}

	fn snapshot(&self) -> C::Value {
		self.get()
	}

	fn load_all(&self) -> LoadFuture<C::Value> {
		load_one(self)
	}

	fn reload_all(&self) -> LoadFuture<C::Value> {
		reload_one(self)
	}

	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
		smallvec![on_change(self, listener)]
	}
}

impl<C> Dependencies for Vec<C>
where
	C: Readable + Clone,
{
	type Values = Vec<C::Value>;

	fn normalize(&self) -> SmallVec<[&dyn Probe; 4]> {
		self.iter().map(|cell| cell as &dyn Probe).collect()
	}

	fn snapshot(&self) -> Vec<C::Value> {
		self.iter().map(|cell| cell.get()).collect()
	}

	fn load_all(&self) -> LoadFuture<Vec<C::Value>> {
		future::try_join_all(self.iter().map(|cell| load_one(cell))).boxed_local()
	}

	fn reload_all(&self) -> LoadFuture<Vec<C::Value>> {
		future::try_join_all(self.iter().map(|cell| reload_one(cell))).boxed_local()
	}

	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
		self.iter()
			.map(|cell| on_change(cell, listener.clone()))
			.collect()
	}
}

impl<A> Dependencies for (A,)
where
	A: Readable + Clone,
{
	type Values = (A::Value,);

	fn normalize(&self) -> SmallVec<[&dyn Probe; 4]> {
		smallvec![&self.0 as &dyn Probe]
	}

	fn snapshot(&self) -> Self::Values {
		(self.0.get(),)
	}

	fn load_all(&self) -> LoadFuture<Self::Values> {
		load_one(&self.0).map(|a| a.map(|a| (a,))).boxed_local()
	}

	fn reload_all(&self) -> LoadFuture<Self::Values> {
		reload_one(&self.0).map(|a| a.map(|a| (a,))).boxed_local()
	}

	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
		smallvec![on_change(&self.0, listener)]
	}
}

macro_rules! tuple_dependencies {
	($($cell:ident $var:ident $idx:tt),+) => {
		impl<$($cell),+> Dependencies for ($($cell,)+)
		where
			$($cell: Readable + Clone),+
		{
			type Values = ($($cell::Value,)+);

			fn normalize(&self) -> SmallVec<[&dyn Probe; 4]> {
				smallvec![$(&self.$idx as &dyn Probe),+]
			}

			fn snapshot(&self) -> Self::Values {
				($(self.$idx.get(),)+)
			}

			fn load_all(&self) -> LoadFuture<Self::Values> {
				$(let $var = load_one(&self.$idx);)+
				async move { futures::try_join!($($var),+) }.boxed_local()
			}

			fn reload_all(&self) -> LoadFuture<Self::Values> {
				$(let $var = reload_one(&self.$idx);)+
				async move { futures::try_join!($($var),+) }.boxed_local()
			}

			fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
				smallvec![$(on_change(&self.$idx, listener.clone())),+]
			}
		}
	};
}

tuple_dependencies!(A a 0, B b 1);
tuple_dependencies!(A a 0, B b 1, C c 2);
tuple_dependencies!(A a 0, B b 1, C c 2, D d 3);
tuple_dependencies!(A a 0, B b 1, C c 2, D d 3, E e 4);
tuple_dependencies!(A a 0, B b 1, C c 2, D d 3, E e 4, F f 5);

#[cfg(test)]
mod tests {
	use std::cell::RefCell;

	use super::*;
	use crate::readable::Capabilities;
	use crate::{async_readable, writable, Store, Writable};

	/// Records which entry point a driver used.
	#[derive(Clone)]
	struct Tracked {
		value: Writable<u32>,
		capabilities: Capabilities,
		calls: Rc<RefCell<Vec<&'static str>>>,
	}

	impl Tracked {
		fn new(capabilities: Capabilities) -> Self {
			Tracked {
				value: writable(7),
				capabilities,
				calls: Rc::default(),
			}
		}
	}

	impl Readable for Tracked {
		type Value = u32;

		fn get(&self) -> u32 {
			self.value.get()
		}

		fn subscribe(&self, listener: Box<dyn Fn(&u32)>) -> Subscription {
			self.value.subscribe(listener)
		}

		fn capabilities(&self) -> Capabilities {
			self.capabilities
		}

		fn load(&self) -> LoadFuture<u32> {
			self.calls.borrow_mut().push("load");
			future::ready(Ok(self.get())).boxed_local()
		}

		fn reload(&self) -> LoadFuture<u32> {
			self.calls.borrow_mut().push("reload");
			future::ready(Ok(self.get())).boxed_local()
		}
	}

	#[tokio::test]
	async fn plain_cells_resolve_to_snapshots_in_order() {
		let a = writable(1);
		let b = writable("b".to_string());

		assert_eq!(load_all(&a).await.unwrap(), 1);
		assert_eq!(
			load_all(&(a.clone(), b.clone())).await.unwrap(),
			(1, "b".to_string())
		);
		assert_eq!(
			reload_all(&(b.clone(), a.clone())).await.unwrap(),
			("b".to_string(), 1)
		);
		assert_eq!(
			reload_all(&vec![a.clone(), writable(2), writable(3)])
				.await
				.unwrap(),
			vec![1, 2, 3]
		);
		load_all(&()).await.unwrap();
	}

	#[test]
	fn normalize_wraps_a_bare_cell() {
		let a = writable(1);

		assert_eq!(normalize(&a).len(), 1);
		assert_eq!(normalize(&(a.clone(),)).len(), 1);
		assert_eq!(normalize(&(a.clone(), a.clone(), a.clone())).len(), 3);
		assert!(normalize(&()).is_empty());
		assert!(normalize(&Vec::<Writable<i32>>::new()).is_empty());
	}

	#[test]
	fn capability_probes() {
		let plain = writable(0u32);
		let loadable = Tracked::new(Capabilities::LOAD);
		let reloadable = Tracked::new(Capabilities::RELOAD);

		assert!(!is_loadable(&plain));
		assert!(is_loadable(&loadable));
		assert!(!is_reloadable(&loadable));
		assert!(is_reloadable(&reloadable));

		assert!(!any_loadable(&(plain.clone(),)));
		assert!(any_loadable(&(plain.clone(), loadable.clone())));
		assert!(!any_reloadable(&(plain.clone(), loadable.clone())));
		assert!(any_reloadable(&vec![loadable, reloadable]));
		assert!(!any_loadable(&()));
	}

	#[tokio::test]
	async fn reload_prefers_reload_then_load_then_snapshot() {
		let reloadable = Tracked::new(Capabilities::RELOAD);
		let loadable = Tracked::new(Capabilities::LOAD);
		let plain = Tracked::new(Capabilities::NONE);

		let deps = (reloadable.clone(), loadable.clone(), plain.clone());
		assert_eq!(reload_all(&deps).await.unwrap(), (7, 7, 7));

		assert_eq!(*reloadable.calls.borrow(), vec!["reload"]);
		assert_eq!(*loadable.calls.borrow(), vec!["load"]);
		assert!(plain.calls.borrow().is_empty());

		load_all(&deps).await.unwrap();
		assert_eq!(*reloadable.calls.borrow(), vec!["reload", "load"]);
	}

	#[tokio::test]
	async fn first_failure_rejects_the_whole_set() {
		let failing = async_readable(0, || async { anyhow::bail!("unreachable host") }, false);
		let fine: Store<i32> = writable(1).into();

		let err = load_all(&vec![fine.clone(), failing.clone().into()])
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Load(_)));
		assert!(err.to_string().contains("unreachable host"));

		assert!(!safe_load(&failing).await);
		assert!(safe_load(&fine).await);
	}

	#[test]
	fn changes_skip_the_initial_delivery() {
		let a = writable(1);
		let b = writable(2);
		let hits = Rc::new(Cell::new(0));

		let subscriptions = (a.clone(), b.clone()).subscribe_changes(Rc::new({
			let hits = hits.clone();
			move || hits.set(hits.get() + 1)
		}));
		assert_eq!(hits.get(), 0);

		a.set(10);
		b.set(20);
		assert_eq!(hits.get(), 2);

		drop(subscriptions);
		a.set(11);
		assert_eq!(hits.get(), 2);
		assert!(!a.is_observed());
	}
}
