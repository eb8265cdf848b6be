//! The per-request capability the server invokes.

use std::sync::Arc;

/// Converts one request line into one response.
///
/// Must be total: every input yields an output. The server strips the
/// request's trailing `\n` before calling and appends one after.
pub trait Handler: Send + Sync {
    fn handle(&self, input: &str) -> String;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle(&self, input: &str) -> String {
        (**self).handle(input)
    }
}

/// Returns its input unmodified.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, input: &str) -> String {
        input.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_returns_input() {
        assert_eq!(EchoHandler.handle("0.3"), "0.3");
        assert_eq!(EchoHandler.handle(""), "");
    }
}
