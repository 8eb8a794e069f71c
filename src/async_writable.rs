use std::cell::RefCell;
use std::future::Future;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use futures::future::{self, FutureExt, LocalBoxFuture, Shared};

use crate::dependencies::{any_reloadable, resolve, Dependencies, Resolve};
use crate::hashed;
use crate::readable::{Capabilities, LoadFuture, Readable, Store};
use crate::{Error, Options, Subscription, Subscriptions, Writable};

pub(crate) type LoadFn<V, T> = Box<dyn Fn(V) -> LocalBoxFuture<'static, anyhow::Result<T>>>;
pub(crate) type WriteFn<V, T> =
	Rc<dyn Fn(T, V) -> LocalBoxFuture<'static, anyhow::Result<Option<T>>>>;

type LoadPromise<T> = Shared<LoadFuture<T>>;

/// A cell computed asynchronously from its parents, which can also be
/// written to through an optional persistence function.
pub struct AsyncWritable<T> {
	body: Rc<AsyncBody<T>>,
}

impl<T> Clone for AsyncWritable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

struct AsyncBody<T> {
	name: &'static str,
	store: Writable<T>,
	effect: Box<dyn AsyncEffect<T>>,
	capabilities: Capabilities,
	reloadable: bool,
	inner: RefCell<AsyncInner<T>>,
}

struct AsyncInner<T> {
	/// Hash of the parent snapshot the last load-triggered derivation used.
	key: Option<u64>,
	/// Latest derivation attempt; replaced, never cancelled.
	current: LoadPromise<T>,
	generation: u64,
}

/// Everything that depends on the concrete dependency set.
trait AsyncEffect<T>: 'static {
	fn resolve(&self, mode: Resolve) -> LocalBoxFuture<'static, Result<(), Error>>;
	/// Snapshots the parents, keeps the values for `invoke` and returns
	/// their memoization key.
	fn compute(&self) -> u64;
	fn invoke(&self) -> LocalBoxFuture<'static, anyhow::Result<T>>;
	/// `None` when there is no write function.
	fn persist(&self, value: T) -> Option<LocalBoxFuture<'static, Result<Option<T>, Error>>>;
	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions;
}

struct MappedEffect<D: Dependencies, T> {
	deps: D,
	load: LoadFn<D::Values, T>,
	write: Option<WriteFn<D::Values, T>>,
	values: RefCell<Option<D::Values>>,
}

impl<D, T> AsyncEffect<T> for MappedEffect<D, T>
where
	D: Dependencies,
	T: 'static,
{
	fn resolve(&self, mode: Resolve) -> LocalBoxFuture<'static, Result<(), Error>> {
		resolve(&self.deps, mode)
	}

	fn compute(&self) -> u64 {
		let values = self.deps.snapshot();
		let key = hashed::key(&values);
		*self.values.borrow_mut() = Some(values);
		key
	}

	fn invoke(&self) -> LocalBoxFuture<'static, anyhow::Result<T>> {
		let values = self.values.borrow_mut().take();
		let values = values.unwrap_or_else(|| self.deps.snapshot());
		(self.load)(values)
	}

	fn persist(&self, value: T) -> Option<LocalBoxFuture<'static, Result<Option<T>, Error>>> {
		let write = self.write.clone()?;
		let parents = self.deps.load_all();
		Some(
			async move {
				let parents = parents.await?;
				write(value, parents).await.map_err(Error::write)
			}
			.boxed_local(),
		)
	}

	fn subscribe_changes(&self, listener: Rc<dyn Fn()>) -> Subscriptions {
		self.deps.subscribe_changes(listener)
	}
}

fn settled<T: Clone + 'static>(result: Result<T, Error>) -> LoadPromise<T> {
	future::ready(result).boxed_local().shared()
}

pub(crate) fn boxed_load<V, T, L, F>(load: L) -> LoadFn<V, T>
where
	L: Fn(V) -> F + 'static,
	F: Future<Output = anyhow::Result<T>> + 'static,
{
	Box::new(move |values| load(values).boxed_local())
}

fn boxed_write<V, T, W, F>(write: W) -> WriteFn<V, T>
where
	W: Fn(T, V) -> F + 'static,
	F: Future<Output = anyhow::Result<Option<T>>> + 'static,
{
	Rc::new(move |value, parents| write(value, parents).boxed_local())
}

/// Builds an [`AsyncWritable`] whose writes go through `write`.
///
/// `write` receives the new value and the loaded parent values; a returned
/// `Some` replaces the optimistically written value.
pub fn async_writable<D, T, L, LF, W, WF>(
	deps: D,
	load: L,
	write: W,
	mut options: Options<T>,
) -> AsyncWritable<T>
where
	D: Dependencies,
	T: Clone + Hash + Default + 'static,
	L: Fn(D::Values) -> LF + 'static,
	LF: Future<Output = anyhow::Result<T>> + 'static,
	W: Fn(T, D::Values) -> WF + 'static,
	WF: Future<Output = anyhow::Result<Option<T>>> + 'static,
{
	let initial = options.initial.take().unwrap_or_default();
	AsyncWritable::from_parts(
		deps,
		boxed_load(load),
		Some(boxed_write(write)),
		initial,
		&options,
	)
}

impl<T> AsyncWritable<T>
where
	T: Clone + Hash + 'static,
{
	/// An async cell without a write function: writes only update the
	/// visible value.
	pub fn new<D, L, F>(deps: D, load: L, mut options: Options<T>) -> Self
	where
		D: Dependencies,
		T: Default,
		L: Fn(D::Values) -> F + 'static,
		F: Future<Output = anyhow::Result<T>> + 'static,
	{
		let initial = options.initial.take().unwrap_or_default();
		Self::from_parts(deps, boxed_load(load), None, initial, &options)
	}

	pub(crate) fn from_parts<D: Dependencies>(
		deps: D,
		load: LoadFn<D::Values, T>,
		write: Option<WriteFn<D::Values, T>>,
		initial: T,
		options: &Options<T>,
	) -> Self {
		let capabilities = Capabilities {
			load: true,
			reload: options.reloadable || any_reloadable(&deps),
		};
		let effect = MappedEffect {
			deps,
			load,
			write,
			values: RefCell::new(None),
		};

		AsyncWritable {
			body: Rc::new_cyclic(|this: &Weak<AsyncBody<T>>| {
				let this = this.clone();
				AsyncBody {
					name: options.name,
					store: Writable::with_start(initial.clone(), move |_| match this.upgrade() {
						Some(body) => body.start(),
						None => Subscriptions::new(),
					}),
					effect: Box::new(effect),
					capabilities,
					reloadable: options.reloadable,
					inner: RefCell::new(AsyncInner {
						key: None,
						current: settled(Ok(initial)),
						generation: 0,
					}),
				}
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> T {
		self.body.store.get()
	}

	/// The first subscriber starts a derivation and keeps the cell following
	/// its parents until the last one unsubscribes.
	///
	/// # Panics
	///
	/// Background derivations are spawned with [`tokio::task::spawn_local`],
	/// so the first subscription panics outside of a [`tokio::task::LocalSet`].
	pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
		self.body.store.subscribe(listener)
	}

	pub fn capabilities(&self) -> Capabilities {
		self.body.capabilities
	}

	/// Resolves once the parents are loaded and the value derived from them
	/// is available. Unchanged parents reuse the previous derivation.
	pub fn load(&self) -> LoadFuture<T> {
		self.body.derive(Resolve::Load, false)
	}

	/// Reloads the parents and derives again even if nothing changed.
	pub fn reload(&self) -> LoadFuture<T> {
		self.body.derive(Resolve::Reload, true)
	}

	pub fn set(&self, value: T) -> LocalBoxFuture<'static, Result<(), Error>> {
		self.body.clone().write(value).boxed_local()
	}

	pub fn update(&self, func: impl FnOnce(T) -> T + 'static) -> LocalBoxFuture<'static, Result<(), Error>> {
		let body = self.body.clone();
		async move {
			let current = body.derive(Resolve::Load, false).await?;
			body.write(func(current)).await
		}
		.boxed_local()
	}
}

impl<T> AsyncBody<T>
where
	T: Clone + Hash + 'static,
{
	fn start(self: &Rc<Self>) -> Subscriptions {
		tracing::trace!(cell = self.name, "observed, following parents");
		self.spawn_pass();

		let this = Rc::downgrade(self);
		self.effect.subscribe_changes(Rc::new(move || {
			if let Some(body) = this.upgrade() {
				body.spawn_pass();
			}
		}))
	}

	/// Nobody awaits a notification-triggered pass, so its failure ends here.
	fn spawn_pass(self: &Rc<Self>) {
		let pass = self.derive(Resolve::Load, false);
		let name = self.name;
		let _ = tokio::task::spawn_local(async move {
			if let Err(err) = pass.await {
				tracing::debug!(cell = name, error = %err, "background load failed");
			}
		});
	}

	fn derive(self: &Rc<Self>, mode: Resolve, force: bool) -> LoadFuture<T> {
		let parents = self.effect.resolve(mode);
		let issued = self.inner.borrow().generation;
		let this = Rc::downgrade(self);

		async move {
			if let Err(err) = parents.await {
				if let Some(body) = this.upgrade() {
					tracing::debug!(cell = body.name, error = %err, "parents failed to resolve");
					let mut inner = body.inner.borrow_mut();
					// a newer pass or write already owns the current promise
					if inner.generation == issued {
						inner.key = None;
						inner.current = settled(Err(err.clone()));
					}
				}
				return Err(err);
			}

			let body = this.upgrade().ok_or(Error::Dropped)?;
			let key = body.effect.compute();

			if !force {
				let mut inner = body.inner.borrow_mut();
				if inner.key == Some(key) {
					tracing::trace!(cell = body.name, "parents unchanged, reusing last load");
					let current = inner.current.clone();
					drop(inner);
					return current.await;
				}
				inner.key = Some(key);
			}

			body.begin().await
		}
		.boxed_local()
	}

	/// Invokes the load function under a fresh generation and records the
	/// result as the current load promise.
	fn begin(self: &Rc<Self>) -> LoadPromise<T> {
		let generation = self.next_generation();
		tracing::trace!(cell = self.name, generation, "deriving");

		let computation = self.effect.invoke();
		let this = Rc::downgrade(self);
		let derivation = async move {
			let value = computation.await.map_err(Error::load)?;
			if let Some(body) = this.upgrade() {
				body.apply(generation, value.clone());
			}
			Ok(value)
		}
		.boxed_local()
		.shared();

		self.inner.borrow_mut().current = derivation.clone();
		derivation
	}

	async fn write(self: Rc<Self>, value: T) -> Result<(), Error> {
		match self.derive(Resolve::Load, false).await {
			Ok(_) => self.chain(value.clone()),
			Err(err) => {
				tracing::debug!(cell = self.name, error = %err, "load before write failed");
				self.inner.borrow_mut().current = settled(Ok(value.clone()));
			}
		}

		let generation = self.next_generation();
		self.store.set(value.clone());

		if let Some(persist) = self.effect.persist(value) {
			if let Some(value) = persist.await? {
				if self.apply(generation, value.clone()) {
					self.chain(value);
				}
			}
		}

		if self.reloadable {
			self.derive(Resolve::Reload, true).await?;
		}

		Ok(())
	}

	fn next_generation(&self) -> u64 {
		let mut inner = self.inner.borrow_mut();
		inner.generation += 1;
		inner.generation
	}

	/// Publishes `value` unless a newer derivation or write was issued since
	/// `generation`.
	fn apply(&self, generation: u64, value: T) -> bool {
		if self.inner.borrow().generation != generation {
			tracing::trace!(cell = self.name, generation, "discarding superseded result");
			return false;
		}

		self.store.set(value);
		true
	}

	/// Makes the current load promise resolve to `value` once the previous
	/// one has settled.
	fn chain(&self, value: T) {
		let mut inner = self.inner.borrow_mut();
		let previous = inner.current.clone();
		let outcome = previous.peek().cloned();
		inner.current = match outcome {
			Some(result) => settled(result.map(|_| value)),
			None => async move { previous.await.map(|_| value) }
				.boxed_local()
				.shared(),
		};
	}
}

impl<T> Readable for AsyncWritable<T>
where
	T: Clone + Hash + 'static,
{
	type Value = T;

	fn get(&self) -> T {
		AsyncWritable::get(self)
	}

	fn subscribe(&self, listener: Box<dyn Fn(&T)>) -> Subscription {
		AsyncWritable::subscribe(self, listener)
	}

	fn capabilities(&self) -> Capabilities {
		AsyncWritable::capabilities(self)
	}

	fn load(&self) -> LoadFuture<T> {
		AsyncWritable::load(self)
	}

	fn reload(&self) -> LoadFuture<T> {
		AsyncWritable::reload(self)
	}
}

impl<T> From<AsyncWritable<T>> for Store<T>
where
	T: Clone + Hash + 'static,
{
	fn from(cell: AsyncWritable<T>) -> Self {
		Store::new(cell)
	}
}

impl<T> std::fmt::Debug for AsyncWritable<T>
where
	T: Clone + Hash + std::fmt::Debug + 'static,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AsyncWritable")
			.field("name", &self.body.name)
			.field("value", &self.body.store.get())
			.field("capabilities", &self.body.capabilities)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::cell::Cell;

	use futures::channel::oneshot;
	use tokio::task::LocalSet;

	use super::*;
	use crate::{async_readable, writable};

	async fn settle() {
		for _ in 0..8 {
			tokio::task::yield_now().await;
		}
	}

	/// Its first load waits on `gate` and then fails, later loads resolve at once.
	#[derive(Clone)]
	struct Flaky {
		value: Writable<i32>,
		gate: Rc<RefCell<Option<oneshot::Receiver<()>>>>,
	}

	impl Readable for Flaky {
		type Value = i32;

		fn get(&self) -> i32 {
			self.value.get()
		}

		fn subscribe(&self, listener: Box<dyn Fn(&i32)>) -> Subscription {
			self.value.subscribe(listener)
		}

		fn capabilities(&self) -> Capabilities {
			Capabilities::LOAD
		}

		fn load(&self) -> LoadFuture<i32> {
			match self.gate.borrow_mut().take() {
				Some(gate) => async move {
					let _ = gate.await;
					Err::<i32, _>(Error::load(anyhow::anyhow!("timed out")))
				}
				.boxed_local(),
				None => future::ready(Ok(self.get())).boxed_local(),
			}
		}
	}

	#[tokio::test]
	async fn superseded_derivation_does_not_overwrite_a_write() {
		let parent = writable(1);
		let (release, gate) = oneshot::channel::<()>();
		let gate = Rc::new(RefCell::new(Some(gate)));

		let cell = AsyncWritable::new(
			parent.clone(),
			move |v| {
				let gate = gate.borrow_mut().take();
				async move {
					if let Some(gate) = gate {
						let _ = gate.await;
					}
					anyhow::Ok(v * 10)
				}
			},
			Options::default(),
		);

		let mut slow = cell.load();
		assert!(futures::poll!(&mut slow).is_pending());

		parent.set(2);
		cell.set(5).await.unwrap();
		assert_eq!(cell.get(), 5);

		release.send(()).unwrap();
		assert_eq!(slow.await.unwrap(), 10);
		assert_eq!(cell.get(), 5);
	}

	#[tokio::test]
	async fn ancestor_failure_leaves_value_untouched() {
		let fail = Rc::new(Cell::new(true));
		let parent = AsyncWritable::new(
			(),
			{
				let fail = fail.clone();
				move |()| {
					let fail = fail.get();
					async move {
						if fail {
							anyhow::bail!("backend down");
						}
						Ok(4)
					}
				}
			},
			Options::default().reloadable(),
		);
		let child = AsyncWritable::new(
			parent.clone(),
			|v| async move { anyhow::Ok(v + 1) },
			Options::default().initial(-1).name("child"),
		);
		assert!(child.capabilities().reload);

		assert!(matches!(child.load().await, Err(Error::Load(_))));
		assert_eq!(child.get(), -1);

		fail.set(false);
		assert_eq!(child.reload().await.unwrap(), 5);
		assert_eq!(child.get(), 5);
	}

	#[tokio::test]
	async fn subscription_follows_parents() {
		LocalSet::new()
			.run_until(async {
				let parent = writable(1);
				let cell = AsyncWritable::new(
					parent.clone(),
					|v| async move { anyhow::Ok(v * 2) },
					Options::default(),
				);

				let seen = Rc::new(RefCell::new(Vec::new()));
				let subscription = cell.subscribe({
					let seen = seen.clone();
					move |v| seen.borrow_mut().push(*v)
				});
				settle().await;
				assert_eq!(*seen.borrow(), vec![0, 2]);

				parent.set(3);
				settle().await;
				assert_eq!(*seen.borrow(), vec![0, 2, 6]);

				drop(subscription);
				assert!(!parent.is_observed());
			})
			.await;
	}

	#[tokio::test]
	async fn background_failures_are_swallowed() {
		LocalSet::new()
			.run_until(async {
				let parent = writable(1);
				let cell = AsyncWritable::new(
					parent.clone(),
					|v: i32| async move {
						if v < 0 {
							anyhow::bail!("negative input");
						}
						Ok(v)
					},
					Options::default(),
				);

				let _subscription = cell.subscribe(|_| {});
				settle().await;
				assert_eq!(cell.get(), 1);

				parent.set(-1);
				settle().await;
				assert_eq!(cell.get(), 1);
				assert!(cell.load().await.is_err());
			})
			.await;
	}

	#[tokio::test]
	async fn failed_write_function_surfaces_to_caller() {
		let cell = async_writable(
			(),
			|()| async { anyhow::Ok(0) },
			|_: i32, ()| async { Err::<Option<i32>, _>(anyhow::anyhow!("read-only")) },
			Options::default(),
		);

		let err = cell.set(3).await.unwrap_err();
		assert!(matches!(err, Error::Write(_)));
		assert_eq!(cell.get(), 3);
	}

	#[tokio::test]
	async fn reloadable_write_refreshes_from_source() {
		let stored = Rc::new(Cell::new(1));
		let cell = async_writable(
			(),
			{
				let stored = stored.clone();
				move |()| {
					let value = stored.get();
					async move { anyhow::Ok(value) }
				}
			},
			{
				let stored = stored.clone();
				move |value: i32, ()| {
					// the backend clamps what it stores
					stored.set(value.min(10));
					async { anyhow::Ok(None) }
				}
			},
			Options::default().reloadable(),
		);

		assert_eq!(cell.load().await.unwrap(), 1);
		cell.set(50).await.unwrap();
		assert_eq!(cell.get(), 10);
		assert_eq!(cell.load().await.unwrap(), 10);
	}

	#[test]
	#[should_panic(expected = "LocalSet")]
	fn subscribing_outside_a_local_set_panics() {
		let cell = AsyncWritable::new(
			writable(1),
			|v: i32| async move { anyhow::Ok(v) },
			Options::default(),
		);
		let _subscription = cell.subscribe(|_| {});
	}

	#[tokio::test]
	async fn write_over_failing_parent_keeps_written_value() {
		let parent = async_readable(0, || async { anyhow::bail!("offline") }, false);
		let child = AsyncWritable::new(
			parent.clone(),
			|v: i32| async move { anyhow::Ok(v) },
			Options::default(),
		);

		child.set(5).await.unwrap();
		assert_eq!(child.get(), 5);
		assert!(matches!(child.load().await, Err(Error::Load(_))));
		assert_eq!(child.get(), 5);
	}

	#[tokio::test]
	async fn background_ancestor_failure_is_swallowed() {
		LocalSet::new()
			.run_until(async {
				let online = Rc::new(Cell::new(false));
				let parent = async_readable(
					0,
					{
						let online = online.clone();
						move || {
							let online = online.get();
							async move {
								if !online {
									anyhow::bail!("offline");
								}
								Ok(4)
							}
						}
					},
					true,
				);
				let child = AsyncWritable::new(
					parent.clone(),
					|v: i32| async move { anyhow::Ok(v + 1) },
					Options::default().initial(-1).name("child"),
				);

				let seen = Rc::new(RefCell::new(Vec::new()));
				let _subscription = child.subscribe({
					let seen = seen.clone();
					move |v| seen.borrow_mut().push(*v)
				});
				settle().await;
				assert_eq!(child.get(), -1);

				online.set(true);
				assert_eq!(parent.reload().await.unwrap(), 4);
				settle().await;
				assert_eq!(*seen.borrow(), vec![-1, 5]);
			})
			.await;
	}

	#[tokio::test]
	async fn dropping_the_cell_rejects_its_pending_load() {
		let (release, gate) = oneshot::channel::<()>();
		let gate = Rc::new(RefCell::new(Some(gate)));
		let parent = async_readable(
			0,
			move || {
				let gate = gate.borrow_mut().take();
				async move {
					if let Some(gate) = gate {
						let _ = gate.await;
					}
					anyhow::Ok(3)
				}
			},
			false,
		);
		let child = AsyncWritable::new(
			parent.clone(),
			|v: i32| async move { anyhow::Ok(v * 2) },
			Options::default(),
		);

		let mut pending = child.load();
		assert!(futures::poll!(&mut pending).is_pending());

		drop(child);
		release.send(()).unwrap();
		assert!(matches!(pending.await, Err(Error::Dropped)));
		assert_eq!(parent.get(), 3);
	}

	#[tokio::test]
	async fn stale_parent_failure_keeps_newer_load() {
		let (release, gate) = oneshot::channel::<()>();
		let parent = Flaky {
			value: writable(3),
			gate: Rc::new(RefCell::new(Some(gate))),
		};
		let runs = Rc::new(Cell::new(0));
		let cell = AsyncWritable::new(
			parent,
			{
				let runs = runs.clone();
				move |v: i32| {
					runs.set(runs.get() + 1);
					async move { anyhow::Ok(v * 2) }
				}
			},
			Options::default(),
		);

		let mut stale = cell.load();
		assert!(futures::poll!(&mut stale).is_pending());
		assert_eq!(cell.load().await.unwrap(), 6);

		release.send(()).unwrap();
		assert!(stale.await.is_err());

		assert_eq!(cell.load().await.unwrap(), 6);
		assert_eq!(runs.get(), 1);
	}
}
