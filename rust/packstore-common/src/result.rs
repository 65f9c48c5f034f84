use crate::error::{Error, ErrorKind};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns `InvalidArgument` from the enclosing function unless the condition holds.
///
/// `verify_arg!(doc_id, doc_id < doc_count)` reports `doc_id` as the argument name
/// and the condition text as the message.
#[macro_export]
macro_rules! verify_arg {
    ($name:ident, $cond:expr) => {
        if !$cond {
            return Err($crate::result::failed_check(
                true,
                stringify!($name),
                stringify!($cond),
            ));
        }
    };
}

/// Returns `InvalidFormat` from the enclosing function unless the condition holds.
/// Used when checking bytes read back from storage.
#[macro_export]
macro_rules! verify_data {
    ($element:ident, $cond:expr) => {
        if !$cond {
            return Err($crate::result::failed_check(
                false,
                stringify!($element),
                stringify!($cond),
            ));
        }
    };
}

#[doc(hidden)]
#[cold]
pub fn failed_check(caller_input: bool, name: &str, condition: &str) -> Error {
    let (name, message) = (name.to_string(), format!("expected {condition}"));
    if caller_input {
        ErrorKind::InvalidArgument { name, message }.into()
    } else {
        ErrorKind::InvalidFormat {
            element: name,
            message,
        }
        .into()
    }
}
