pub use enclose::*;

/// Shorthand for [`derived`](crate::derived) with an optional list of
/// captures cloned into the closure.
///
/// ```
/// use observe_loadable::{derived, writable};
///
/// let a = writable(1);
/// let b = writable(2);
/// let offset = 10;
/// let sum = derived!((a, b), (offset) (a, b) => a + b + offset);
/// assert_eq!(sum.get(), 13);
/// ```
#[macro_export]
macro_rules! derived {
    ($deps:expr, ( $($d_tt:tt)* ) $values:tt => $($b:tt)*) => {
        $crate::derived($deps, $crate::macros::enclose!(($( $d_tt )*) move |$values| { $($b)* }))
    };
    ($deps:expr, $values:tt => $($b:tt)*) => {
        $crate::derived($deps, move |$values| { $($b)* })
    };
}
