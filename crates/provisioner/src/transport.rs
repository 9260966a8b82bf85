//! Byte transport between the provisioner and a device.
//!
//! A BLE host stack implements [`Transport`] by writing to the device's
//! write characteristic and yielding notifications from its notify
//! characteristic. [`ChannelTransport`] connects two in-process ends and is
//! what the tests use as a stand-in device link.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport write failed: {0}")]
    Write(String),
}

/// A reliable, ordered link carrying whole frames.
pub trait Transport: Send {
    /// Writes one encoded frame.
    fn send<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

    /// Waits for the next inbound frame; `None` once the link is gone.
    fn recv<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + 'a>>;

    /// Closes the link.
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// One end of an in-process transport pair.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Creates two connected ends, each buffering up to `capacity` frames.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }

    /// Returns whether this end can still send.
    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl Transport for ChannelTransport {
    fn send<'a>(
        &'a mut self,
        frame: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
            tx.send(frame.to_vec())
                .await
                .map_err(|_| TransportError::Closed)
        })
    }

    fn recv<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = Option<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { self.rx.recv().await })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.tx = None;
            self.rx.close();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (mut a, mut b) = ChannelTransport::pair(4);
        a.send(&[1]).await.unwrap();
        a.send(&[2, 3]).await.unwrap();

        assert_eq!(b.recv().await, Some(vec![1]));
        assert_eq!(b.recv().await, Some(vec![2, 3]));

        b.send(&[9]).await.unwrap();
        assert_eq!(a.recv().await, Some(vec![9]));
    }

    #[tokio::test]
    async fn test_close_ends_peer_stream() {
        let (mut a, mut b) = ChannelTransport::pair(4);
        assert!(a.is_open());

        a.close().await;
        assert!(!a.is_open());
        assert_eq!(a.send(&[1]).await, Err(TransportError::Closed));
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_fails_after_peer_dropped() {
        let (mut a, b) = ChannelTransport::pair(4);
        drop(b);
        assert_eq!(a.send(&[1]).await, Err(TransportError::Closed));
    }
}
