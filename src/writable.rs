use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::batch;
use crate::hashed::Hashed;
use crate::readable::{Readable, Store};
use crate::subscription::{Subscription, Subscriptions, Unsubscribe};

type Listener<T> = Rc<dyn Fn(&T)>;
type Start<T> = Rc<dyn Fn(&Writable<T>) -> Subscriptions>;

/// Plain observable cell: holds a value and notifies listeners on change.
pub struct Writable<T> {
	body: Rc<WritableBody<T>>,
}

struct WritableBody<T> {
	value: RefCell<Hashed<T>>,
	inner: RefCell<WritableInner<T>>,
}

struct WritableInner<T> {
	listeners: BTreeMap<u64, Listener<T>>,
	next_id: u64,
	start: Option<Start<T>>,
	running: Option<Subscriptions>,
}

impl<T> Clone for Writable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Writable<T>
where
	T: Clone + Default + Hash + 'static,
{
	fn default() -> Self {
		Writable::new(Default::default())
	}
}

pub fn writable<T>(value: T) -> Writable<T>
where
	T: Clone + Hash + 'static,
{
	Writable::new(value)
}

/// A read-only cell driven by `start`, which may set values through the
/// handle it receives.
pub fn readable<T>(value: T, start: impl Fn(&Writable<T>) -> Subscriptions + 'static) -> Store<T>
where
	T: Clone + Hash + 'static,
{
	Store::new(Writable::with_start(value, start))
}

impl<T> Writable<T>
where
	T: Clone + Hash + 'static,
{
	pub fn new(value: T) -> Self {
		Self::build(value, None)
	}

	/// `start` runs when the first listener subscribes, before that listener
	/// is attached. The subscriptions it returns are dropped once the last
	/// listener goes away.
	pub fn with_start(
		value: T,
		start: impl Fn(&Writable<T>) -> Subscriptions + 'static,
	) -> Self {
		Self::build(value, Some(Rc::new(start) as Start<T>))
	}

	fn build(value: T, start: Option<Start<T>>) -> Self {
		Writable {
			body: Rc::new(WritableBody {
				value: RefCell::new(Hashed::new(value)),
				inner: RefCell::new(WritableInner {
					listeners: BTreeMap::new(),
					next_id: 0,
					start,
					running: None,
				}),
			}),
		}
	}

	#[inline]
	pub fn get(&self) -> T {
		self.body.value.borrow().value.clone()
	}

	#[inline]
	pub fn set(&self, value: T) {
		let _ = self.replace(value);
	}

	pub fn replace(&self, value: T) -> T {
		let new = Hashed::new(value);
		let (old, changed) = {
			let mut current = self.body.value.borrow_mut();
			let changed = current.hash != new.hash;
			(std::mem::replace(&mut *current, new), changed)
		};

		if changed {
			self.notify();
		}

		old.value
	}

	pub fn update(&self, func: impl FnOnce(&mut T)) {
		let changed = {
			let mut value = self.body.value.borrow_mut();
			func(&mut value.value);
			value.rehash()
		};

		if changed {
			self.notify();
		}
	}

	pub fn subscribe(&self, listener: impl Fn(&T) + 'static) -> Subscription {
		let start = {
			let inner = self.body.inner.borrow();
			if inner.listeners.is_empty() && inner.running.is_none() {
				inner.start.clone()
			} else {
				None
			}
		};
		let running = start.map(|start| start(self));

		let listener: Listener<T> = Rc::new(listener);
		let id = {
			let mut inner = self.body.inner.borrow_mut();
			if running.is_some() {
				inner.running = running;
			}
			let id = inner.next_id;
			inner.next_id += 1;
			inner.listeners.insert(id, listener.clone());
			id
		};

		listener(&self.get());
		Subscription::new(Rc::downgrade(&self.body) as Weak<dyn Unsubscribe>, id)
	}

	pub fn is_observed(&self) -> bool {
		!self.body.inner.borrow().listeners.is_empty()
	}

	fn notify(&self) {
		let listeners: SmallVec<[Listener<T>; 4]> =
			self.body.inner.borrow().listeners.values().cloned().collect();
		if listeners.is_empty() {
			return;
		}

		let value = Rc::new(self.get());
		for listener in listeners {
			let value = value.clone();
			batch::enqueue(Box::new(move || listener(&*value)));
		}
		batch::flush();
	}
}

impl<T: 'static> Unsubscribe for WritableBody<T> {
	fn unsubscribe(&self, id: u64) {
		let stopped = {
			let mut inner = self.inner.borrow_mut();
			inner.listeners.remove(&id);
			if inner.listeners.is_empty() {
				inner.running.take()
			} else {
				None
			}
		};

		// parent subscriptions are released outside of the borrow
		drop(stopped);
	}
}

impl<T> Readable for Writable<T>
where
	T: Clone + Hash + 'static,
{
	type Value = T;

	fn get(&self) -> T {
		Writable::get(self)
	}

	fn subscribe(&self, listener: Box<dyn Fn(&T)>) -> Subscription {
		Writable::subscribe(self, listener)
	}
}

impl<T> From<Writable<T>> for Store<T>
where
	T: Clone + Hash + 'static,
{
	fn from(cell: Writable<T>) -> Self {
		Store::new(cell)
	}
}

impl<T> Debug for Writable<T>
where
	T: 'static + Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.body.value.borrow().fmt(f)
	}
}
