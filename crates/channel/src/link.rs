//! Quantum link primitive consumed by the frame codec.
//!
//! The protocol engine never inspects quantum state itself. It creates
//! pairs, applies corrections, measures and moves [`Qubit`]s through a
//! [`QuantumLink`], which is assumed to deliver every unit to the named peer
//! in order and without loss.

use async_trait::async_trait;
use qubit_bridge_core::{Crumb, PairId, PeerId};

use crate::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QubitState {
    /// Computational basis state carrying one classical bit.
    Basis(bool),
    /// One half of a Bell pair together with the Pauli corrections applied
    /// to it since creation.
    BellHalf {
        pair: PairId,
        bit_flip: bool,
        phase_flip: bool,
    },
}

/// A single quantum unit. Deliberately not `Clone`.
#[derive(Debug)]
pub struct Qubit {
    state: QubitState,
}

impl Qubit {
    pub fn basis(bit: bool) -> Self {
        Self {
            state: QubitState::Basis(bit),
        }
    }

    pub fn bell_half(pair: PairId) -> Self {
        Self {
            state: QubitState::BellHalf {
                pair,
                bit_flip: false,
                phase_flip: false,
            },
        }
    }

    pub fn state(&self) -> QubitState {
        self.state
    }

    pub fn pair_id(&self) -> Option<PairId> {
        match self.state {
            QubitState::BellHalf { pair, .. } => Some(pair),
            QubitState::Basis(_) => None,
        }
    }

    pub fn apply_pauli(&mut self, x: bool, z: bool) {
        self.state = match self.state {
            QubitState::Basis(bit) => QubitState::Basis(bit ^ x),
            QubitState::BellHalf {
                pair,
                bit_flip,
                phase_flip,
            } => QubitState::BellHalf {
                pair,
                bit_flip: bit_flip ^ x,
                phase_flip: phase_flip ^ z,
            },
        };
    }
}

#[async_trait]
pub trait QuantumLink: Send + Sync {
    fn local_id(&self) -> &PeerId;

    /// Returns `(local_half, remote_half)`.
    fn create_entangled_pair(&self) -> (Qubit, Qubit);

    fn apply_correction(&self, half: &mut Qubit, crumb: Crumb);

    /// Bell measurement of a received half against the matching local half.
    fn joint_decode(&self, received: Qubit, local: Qubit) -> Crumb;

    fn single_encode(&self, bit: bool) -> Qubit;

    fn single_decode(&self, unit: Qubit) -> bool;

    async fn send(&self, to: &PeerId, unit: Qubit) -> Result<(), LinkError>;

    /// Waits for the next unit sent by `from`.
    async fn receive(&self, from: &PeerId) -> Result<Qubit, LinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pauli_on_basis_only_flips_bit() {
        let mut q = Qubit::basis(false);
        q.apply_pauli(false, true);
        assert_eq!(q.state(), QubitState::Basis(false));
        q.apply_pauli(true, false);
        assert_eq!(q.state(), QubitState::Basis(true));
        assert_eq!(q.pair_id(), None);
    }

    #[test]
    fn test_pauli_on_bell_half_accumulates() {
        let mut q = Qubit::bell_half(3);
        q.apply_pauli(true, true);
        q.apply_pauli(true, false);
        assert_eq!(
            q.state(),
            QubitState::BellHalf {
                pair: 3,
                bit_flip: false,
                phase_flip: true
            }
        );
    }
}
