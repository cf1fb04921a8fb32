//! Crate-wide error type plus the extension traits used to attach context
//! to errors as they bubble out of a location or an execution node.

use std::fmt::Debug;

pub mod error;
pub mod result;

/// Wraps an error with the `Debug` rendering of the object that was being
/// operated on and the function that failed.
pub trait WithDebugObjectAndFnName<S: Into<String>, O: Debug + 'static> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self;
}

/// Wraps an error with a human readable message.
pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}
