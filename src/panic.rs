//! Formatting of panic payloads caught from application callbacks.

use std::{any::Any, fmt};

/// Displayable view of a caught panic payload.
///
/// `panic!` payloads are almost always a `&'static str` or a `String`; other
/// payload types are reported by their type-erased debug form.
///
/// ```
/// use fabriclink::panic::format_panic;
///
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(format_panic(Box::new(String::from("bang"))).to_string(), "bang");
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// The payload text, when the payload is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| self.0.downcast_ref::<String>().map(String::as_str))
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "{:?}", self.0),
        }
    }
}

/// Wrap a payload returned by `catch_unwind`.
pub fn format_panic(payload: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(payload) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_string_payload_has_no_text() {
        let message = format_panic(Box::new(7_u8));
        assert!(message.as_str().is_none());
        assert!(message.to_string().contains("Any"));
    }
}
