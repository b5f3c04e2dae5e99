use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::types::RawFrame;

/// Resultado de encolar en una cola con pérdida
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// Encolado, pero se descartó el elemento más antiguo
    DroppedOldest,
    /// El consumidor ya no existe; el elemento se descarta sin contarlo
    Closed,
}

/// Extremo productor de una cola acotada que descarta lo más antiguo.
///
/// El productor nunca se bloquea: si la cola está llena se saca el elemento
/// más viejo y se cuenta la pérdida. La memoria queda acotada por la
/// capacidad; bajo sobrecarga se pierden muestras.
#[derive(Debug)]
pub struct LossySender<T> {
    name: Arc<str>,
    tx: Sender<T>,
    // Para poder desalojar la cabeza cuando está llena. Mantiene el canal
    // abierto, así que el cierre se señala con `closed`.
    evict: Receiver<T>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for LossySender<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            closed: Arc::clone(&self.closed),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

/// Extremo consumidor. Al soltarlo la cola queda cerrada para los productores.
pub struct LossyReceiver<T> {
    rx: Receiver<T>,
    closed: Arc<AtomicBool>,
}

impl<T> Deref for LossyReceiver<T> {
    type Target = Receiver<T>;

    fn deref(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T> Drop for LossyReceiver<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        // Lo pendiente ya no lo leerá nadie
        while self.rx.try_recv().is_ok() {}
    }
}

/// Emisor de tramas crudas hacia un carril de decodificación
pub type FrameSender = LossySender<RawFrame>;

/// Crea una cola con pérdida de capacidad `capacity`
pub fn lossy_queue<T>(name: &str, capacity: usize) -> (LossySender<T>, LossyReceiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    let sender = LossySender {
        name: Arc::from(name),
        tx,
        evict: rx.clone(),
        closed: Arc::clone(&closed),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, LossyReceiver { rx, closed })
}

impl<T> LossySender<T> {
    /// Encola `item`, desalojando el más antiguo si la cola está llena
    pub fn push(&self, item: T) -> Push {
        if self.is_closed() {
            return Push::Closed;
        }

        let mut item = item;
        let mut outcome = Push::Queued;

        loop {
            match self.tx.try_send(item) {
                Ok(()) => return outcome,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    // Otro consumidor pudo vaciar un hueco entre medias
                    if self.evict.try_recv().is_ok() {
                        outcome = Push::DroppedOldest;
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total == 1 || total % 100 == 0 {
                            warn!(queue = %self.name, dropped = total, "Cola llena, descartando lo más antiguo");
                        } else {
                            debug!(queue = %self.name, dropped = total, "Descarte por desbordamiento");
                        }
                    }
                }
                Err(TrySendError::Disconnected(_)) => return Push::Closed,
            }
        }
    }

    /// El consumidor terminó; seguir empujando no tiene efecto
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total de elementos descartados por desbordamiento
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(usize::MAX)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_drops_oldest() {
        let (tx, rx) = lossy_queue::<u32>("acl", 100);
        for i in 0..100 {
            assert_eq!(tx.push(i), Push::Queued);
        }
        assert_eq!(tx.push(100), Push::DroppedOldest);
        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.len(), 100);

        let drained: Vec<u32> = rx.try_iter().collect();
        assert_eq!(drained.first(), Some(&1));
        assert_eq!(drained.last(), Some(&100));
        assert_eq!(drained.len(), 100);
    }

    #[test]
    fn test_producer_never_blocks() {
        let (tx, rx) = lossy_queue::<RawFrame>("led", 4);
        for i in 0..1_000u32 {
            tx.push(vec![(i % 256) as u8; 20]);
        }
        assert_eq!(tx.dropped(), 996);
        assert_eq!(rx.len(), 4);
    }

    #[test]
    fn test_receiver_ends_when_senders_drop() {
        let (tx, rx) = lossy_queue::<u8>("mag", 2);
        let tx2 = tx.clone();
        tx.push(1);
        drop(tx);
        drop(tx2);
        assert_eq!(rx.recv().ok(), Some(1));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_closes_queue() {
        let (tx, rx) = lossy_queue::<u8>("dev", 2);
        let tx2 = tx.clone();
        assert_eq!(tx.push(1), Push::Queued);
        drop(rx);

        assert!(tx.is_closed() && tx2.is_closed());
        for i in 0..5 {
            assert_eq!(tx.push(i), Push::Closed);
        }
        // El cierre no cuenta como desbordamiento
        assert_eq!(tx.dropped(), 0);
        assert_eq!(tx.len(), 0);
    }
}
