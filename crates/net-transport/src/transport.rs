//! Transport trait abstraction

use crate::TransportResult;

/// A blocking, single-flight byte link
///
/// Every send is immediately followed by a receive of a known size; there is
/// no pipelining.
pub trait Transport {
    /// Write the whole buffer or fail. Partial writes are failures.
    fn send(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Block until exactly `exact` bytes arrive or the read deadline passes.
    ///
    /// On deadline the bytes received so far are returned, possibly none; the
    /// caller treats any length other than the one it expects as a failed
    /// exchange. Hard link failures are errors.
    fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        (**self).send(data)
    }

    fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>> {
        (**self).receive(exact)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        (**self).send(data)
    }

    fn receive(&mut self, exact: usize) -> TransportResult<Vec<u8>> {
        (**self).receive(exact)
    }
}
