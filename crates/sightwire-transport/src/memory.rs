//! In-process link pair backed by unbounded channels.
//!
//! Whatever one end sends, the other end receives. Closing either end makes
//! the peer's `recv` return `Ok(None)` once buffered frames are drained.

use tokio::sync::{Mutex, mpsc};

use crate::{Link, LinkId, TransportError, next_link_id};

/// One end of an in-memory link.
pub struct MemoryLink {
    id: LinkId,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

/// Creates two connected ends.
pub fn memory_pair() -> (MemoryLink, MemoryLink) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a = MemoryLink {
        id: next_link_id(),
        tx: Mutex::new(Some(a_tx)),
        rx: Mutex::new(b_rx),
    };
    let b = MemoryLink {
        id: next_link_id(),
        tx: Mutex::new(Some(b_tx)),
        rx: Mutex::new(a_rx),
    };
    (a, b)
}

impl Link for MemoryLink {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let guard = self.tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| TransportError::ConnectionClosed(format!("{} closed", self.id)))?;
        tx.send(data.to_vec())
            .map_err(|_| TransportError::ConnectionClosed(format!("{} peer gone", self.id)))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.tx.lock().await.take();
        Ok(())
    }

    fn id(&self) -> LinkId {
        self.id
    }

    fn peer(&self) -> String {
        format!("memory:{}", self.id)
    }
}
