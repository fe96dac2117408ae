//! FIFO store of locally held halves of distributed Bell pairs.
//!
//! Pairing between the two nodes is positional: the n-th half popped here
//! belongs to the same pair as the n-th half popped by the peer. Halves are
//! therefore only ever appended at the tail and consumed from the front.

use std::collections::VecDeque;

use qubit_bridge_core::PairId;
use tokio::sync::Mutex;

use crate::link::Qubit;

pub struct EntanglementBuffer {
    halves: Mutex<VecDeque<Qubit>>,
    capacity: Option<usize>,
}

impl EntanglementBuffer {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            halves: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Appends at the tail. The capacity is advisory: pushes are never
    /// refused, see [`EntanglementBuffer::has_room_for`].
    pub async fn push(&self, half: Qubit) {
        self.halves.lock().await.push_back(half);
    }

    pub async fn pop_front(&self) -> Option<Qubit> {
        self.halves.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.halves.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.halves.lock().await.is_empty()
    }

    pub async fn has_room_for(&self, additional: usize) -> bool {
        match self.capacity {
            Some(capacity) => self.len().await + additional <= capacity,
            None => true,
        }
    }

    /// Pair ids in consumption order, for pairing diagnostics.
    pub async fn pair_ids(&self) -> Vec<Option<PairId>> {
        self.halves.lock().await.iter().map(Qubit::pair_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = EntanglementBuffer::unbounded();
        for pair in 0..4 {
            buffer.push(Qubit::bell_half(pair)).await;
        }
        assert_eq!(buffer.len().await, 4);

        assert_eq!(
            buffer.pair_ids().await,
            vec![Some(0), Some(1), Some(2), Some(3)]
        );
        let first = buffer.pop_front().await.unwrap();
        assert_eq!(first.pair_id(), Some(0));
        assert_eq!(buffer.pair_ids().await, vec![Some(1), Some(2), Some(3)]);

        while buffer.pop_front().await.is_some() {}
        assert!(buffer.is_empty().await);
        assert!(buffer.pop_front().await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_is_advisory() {
        let buffer = EntanglementBuffer::new(Some(2));
        assert!(buffer.has_room_for(2).await);
        buffer.push(Qubit::bell_half(0)).await;
        assert!(!buffer.has_room_for(2).await);
        buffer.push(Qubit::bell_half(1)).await;
        buffer.push(Qubit::bell_half(2)).await;
        assert_eq!(buffer.len().await, 3);
    }
}
