/// Construction options for async cells.
#[derive(Debug, Clone)]
pub struct Options<T> {
	/// Offer `reload` and refresh from the parents after every write.
	pub reloadable: bool,
	/// Visible value before the first load settles, `T::default()` if unset.
	pub initial: Option<T>,
	/// Shows up as the `cell` field of log events.
	pub name: &'static str,
}

impl<T> Default for Options<T> {
	fn default() -> Self {
		Options {
			reloadable: false,
			initial: None,
			name: "<unnamed>",
		}
	}
}

impl<T> Options<T> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reloadable(mut self) -> Self {
		self.reloadable = true;
		self
	}

	pub fn initial(mut self, value: T) -> Self {
		self.initial = Some(value);
		self
	}

	pub fn name(mut self, name: &'static str) -> Self {
		self.name = name;
		self
	}
}
