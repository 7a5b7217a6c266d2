//! Configuration for the mDNS responder.
//!
//! # Examples
//!
//! ```rust
//! use mdns_responder::ResponderConfig;
//!
//! // Default configuration: QU questions allowed, 1200-byte messages.
//! let config = ResponderConfig::default();
//!
//! // Smaller messages for constrained links, QU questions disabled.
//! let config = ResponderConfig::new()
//!     .with_max_message_size(512)
//!     .with_question_unicast_allowed(false);
//! ```

/// Default max size threshold used to split larger messages.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE: u16 = 1200;

/// Whether "QU" questions (requesting unicast responses) are sent by default.
pub(crate) const DEFAULT_QUESTION_UNICAST_ALLOWED: bool = true;

/// Configuration for a [`Responder`](crate::Responder).
///
/// # Fields
///
/// - `question_unicast_allowed`: whether probes may request unicast responses
///   ("QU" questions). The first probe of every entry is sent as a "QU"
///   question when allowed. Disable this on platforms that cannot accept a
///   unicast response on the mDNS port. Default: `true`.
/// - `max_message_size`: size threshold above which a logical message is
///   split across multiple packets. Mainly intended for testing.
///   Default: 1200 bytes.
#[derive(Clone, Debug)]
pub struct ResponderConfig {
    /// Whether "QU" questions requesting unicast responses are allowed.
    pub question_unicast_allowed: bool,

    /// Max size threshold for outbound messages, in bytes.
    pub max_message_size: u16,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            question_unicast_allowed: DEFAULT_QUESTION_UNICAST_ALLOWED,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ResponderConfig {
    /// Create a new configuration with default values.
    ///
    /// Equivalent to [`ResponderConfig::default()`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether "QU" questions requesting unicast responses are allowed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mdns_responder::ResponderConfig;
    ///
    /// let config = ResponderConfig::default().with_question_unicast_allowed(false);
    /// ```
    pub fn with_question_unicast_allowed(mut self, allow: bool) -> Self {
        self.question_unicast_allowed = allow;
        self
    }

    /// Set the max message size threshold.
    ///
    /// A value of zero selects the default (1200 bytes).
    ///
    /// # Example
    ///
    /// ```rust
    /// use mdns_responder::ResponderConfig;
    ///
    /// let config = ResponderConfig::default().with_max_message_size(512);
    /// ```
    pub fn with_max_message_size(mut self, max_size: u16) -> Self {
        self.max_message_size = if max_size == 0 {
            DEFAULT_MAX_MESSAGE_SIZE
        } else {
            max_size
        };
        self
    }
}
