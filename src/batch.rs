use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Job = Box<dyn FnOnce()>;

thread_local! {
	static STARTED: Cell<bool> = Cell::new(false);
	static DRAINING: Cell<bool> = Cell::new(false);
	static QUEUE: RefCell<VecDeque<Job>> = RefCell::new(VecDeque::new());
}

pub fn in_batch() -> bool {
	STARTED.with(|s| s.get())
}

/// Runs `func`, holding back every change notification it causes
/// until it returns.
pub fn batch(func: impl FnOnce()) {
	let is_root = batch_start();
	func();
	if is_root {
		batch_stop();
		flush();
	}
}

fn batch_start() -> bool {
	STARTED.with(|s| {
		if !s.get() {
			s.set(true);
			true
		} else {
			false
		}
	})
}

fn batch_stop() {
	STARTED.with(|s| s.set(false));
}

pub(crate) fn enqueue(job: Job) {
	QUEUE.with(|q| q.borrow_mut().push_back(job));
}

struct Draining;

impl Drop for Draining {
	fn drop(&mut self) {
		DRAINING.with(|d| d.set(false));
	}
}

/// Delivers queued notifications in FIFO order. Re-entrant calls made by a
/// listener return immediately; the outer drain picks up their jobs.
pub(crate) fn flush() {
	if in_batch() || DRAINING.with(|d| d.replace(true)) {
		return;
	}

	let _draining = Draining;
	loop {
		let job = QUEUE.with(|q| q.borrow_mut().pop_front());
		let Some(job) = job else {
			break;
		};
		job();
	}
}
