use crate::ReadView;
use std::{future::Future, io};

/// The read side of the connection's transport
///
/// The pump is the only caller of [`read`][Self::read], but
/// [`cancel_pending_read`][Self::cancel_pending_read] is invoked from the
/// request lifecycle while a read may be in flight, so implementations use
/// interior mutability. A [`Pipe`][crate::Pipe] fed by the connection loop
/// satisfies this contract directly.
pub trait TransportReader: Send + Sync + 'static {
    /// Wait for buffered input. Returns a snapshot of everything buffered
    /// past the consumed cursor; `is_completed` means no further bytes will
    /// ever arrive, `is_canceled` means [`cancel_pending_read`]
    /// [Self::cancel_pending_read] won the race.
    fn read(&self) -> impl Future<Output = io::Result<ReadView>> + Send;

    /// Release input up to the absolute `consumed` cursor and defer the
    /// next read until bytes arrive past `examined`.
    fn advance_to(&self, consumed: u64, examined: u64);

    /// Wake a pending [`read`][Self::read] with a canceled result.
    fn cancel_pending_read(&self);

    /// The decoder will not read further and the connection cannot complete
    /// normally; the transport may tear down its input side.
    fn on_input_or_output_completed(&self);
}
