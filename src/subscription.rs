use std::fmt::Debug;
use std::rc::Weak;

use smallvec::SmallVec;

pub(crate) trait Unsubscribe {
	fn unsubscribe(&self, id: u64);
}

/// Keeps a listener attached to a cell. Dropping it detaches the listener;
/// when the last one goes, the cell stops listening to its own parents.
#[must_use = "dropping a `Subscription` detaches its listener"]
pub struct Subscription {
	cell: Weak<dyn Unsubscribe>,
	id: u64,
}

/// The parent subscriptions a cell holds while it is observed.
pub type Subscriptions = SmallVec<[Subscription; 4]>;

impl Subscription {
	pub(crate) fn new(cell: Weak<dyn Unsubscribe>, id: u64) -> Self {
		Subscription { cell, id }
	}

	pub fn unsubscribe(self) {
		drop(self)
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(cell) = self.cell.upgrade() {
			cell.unsubscribe(self.id)
		}
	}
}

impl Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("attached", &(self.cell.strong_count() > 0))
			.finish()
	}
}
