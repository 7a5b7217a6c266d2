//! Sans-I/O protocol driver trait.
//!
//! A [`Protocol`] implementation holds protocol state and performs no I/O of
//! its own. The caller owns the sockets and the clock and drives the state
//! machine:
//!
//! 1. Pass received datagrams to [`handle_read`](Protocol::handle_read).
//! 2. Send every packet returned by [`poll_write`](Protocol::poll_write).
//! 3. Call [`handle_timeout`](Protocol::handle_timeout) when the deadline
//!    from [`poll_timeout`](Protocol::poll_timeout) expires.
//! 4. Process notifications from [`poll_event`](Protocol::poll_event).
//!
//! This keeps the protocol independent of any runtime: the same state machine
//! runs under tokio, a blocking loop, or a unit test with a synthetic clock.

/// A sans-I/O protocol state machine.
///
/// `Rin`, `Win`, and `Ein` are the read, write, and event *input* types;
/// outputs are associated types so a protocol can narrow them independently.
pub trait Protocol<Rin, Win, Ein> {
    /// Associated read output type
    type Rout;
    /// Associated write output type
    type Wout;
    /// Associated event output type
    type Eout;
    /// Associated error type
    type Error;
    /// Associated time type (usually `std::time::Instant`)
    type Time;

    /// Handles an inbound message.
    fn handle_read(&mut self, msg: Rin) -> Result<(), Self::Error>;

    /// Polls the next read output, if any.
    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    /// Handles an outbound message request.
    fn handle_write(&mut self, _msg: Win) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Polls the next packet to transmit, if any.
    fn poll_write(&mut self) -> Option<Self::Wout>;

    /// Handles an external event.
    fn handle_event(&mut self, _evt: Ein) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Polls the next protocol event, if any.
    fn poll_event(&mut self) -> Option<Self::Eout> {
        None
    }

    /// Advances protocol timers to `now`.
    fn handle_timeout(&mut self, now: Self::Time) -> Result<(), Self::Error>;

    /// Returns the next deadline at which [`handle_timeout`](Protocol::handle_timeout)
    /// must be called, if any timer is armed.
    fn poll_timeout(&mut self) -> Option<Self::Time>;

    /// Closes the protocol, releasing all state.
    fn close(&mut self) -> Result<(), Self::Error>;
}
