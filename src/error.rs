use std::rc::Rc;

/// Failure of a load, reload or write.
///
/// Cloneable so a single rejected load can be observed by every awaiter.
/// Dependents forward an ancestor's error unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("load failed: {0}")]
	Load(Rc<anyhow::Error>),
	#[error("write failed: {0}")]
	Write(Rc<anyhow::Error>),
	#[error("cell was dropped before its load settled")]
	Dropped,
}

impl Error {
	pub(crate) fn load(error: anyhow::Error) -> Self {
		Error::Load(Rc::new(error))
	}

	pub(crate) fn write(error: anyhow::Error) -> Self {
		Error::Write(Rc::new(error))
	}
}
