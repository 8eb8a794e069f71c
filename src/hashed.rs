use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Deref;

/// Computes the key used both for change detection and for memoizing
/// derivations over a parent snapshot.
pub(crate) fn key<T: Hash + ?Sized>(value: &T) -> u64 {
	fxhash::hash64(value)
}

pub(crate) struct Hashed<T> {
	pub value: T,
	pub hash: u64,
}

impl<T> Hashed<T>
where
	T: Hash,
{
	pub fn new(value: T) -> Self {
		let hash = key(&value);
		Self { value, hash }
	}

	/// Recomputes the hash after an in-place mutation,
	/// returns `true` if it changed.
	pub fn rehash(&mut self) -> bool {
		let hash = key(&self.value);
		let changed = hash != self.hash;
		self.hash = hash;
		changed
	}
}

impl<T> Deref for Hashed<T> {
	type Target = T;
	fn deref(&self) -> &Self::Target {
		&self.value
	}
}

impl<T> Debug for Hashed<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.value.fmt(f)
	}
}
