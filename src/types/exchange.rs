//! Result of a single command/response exchange.

/// Text captured between sending a command and the next prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeResult {
    /// Echoed command line (empty unless echo is enabled).
    pub echo: String,
    /// Response body without the echo line and the trailing prompt.
    pub response: String,
}

impl ExchangeResult {
    /// Returns true if the device reported a Lua runtime or syntax error.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        crate::protocol::parser::has_error_marker(&self.response)
    }
}
