//! One neighbour relationship and its non-blocking exchange state.

use polymd_core::errors::Result;
use polymd_core::math::Vec3;
use polymd_core::molecule::MoleculeRecord;
use polymd_physics::cells::LinkedCells;

use crate::transport::{Endpoint, Packet};

/// What an exchange moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Migrating owners plus ghost copies in one message.
    LeavingAndHaloCopies,
    /// Only molecules that left the subdomain.
    LeavingOnly,
    /// Only ghost copies for the neighbour's halo.
    HaloCopies,
}

/// Progress of one partner through an exchange stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerState {
    Idle,
    Sending,
    AwaitingCount,
    Receiving,
    Done,
}

/// Peer rank plus the paired send/receive regions for one direction.
#[derive(Debug, Clone)]
pub struct CommunicationPartner {
    rank: usize,
    /// Direction from this rank towards the peer.
    offset: [i8; 3],
    /// Strip inside the own box whose molecules become the peer's ghosts.
    copy_region: (Vec3, Vec3),
    /// Territory of the peer (unwrapped); owners found here have left.
    leaving_region: (Vec3, Vec3),
    /// Added to positions on send, mapping them into the peer's frame.
    shift: Vec3,
    state: PartnerState,
    sent_records: usize,
    received_records: usize,
}

impl CommunicationPartner {
    pub fn new(
        rank: usize,
        offset: [i8; 3],
        copy_region: (Vec3, Vec3),
        leaving_region: (Vec3, Vec3),
        shift: Vec3,
    ) -> Self {
        Self {
            rank,
            offset,
            copy_region,
            leaving_region,
            shift,
            state: PartnerState::Idle,
            sent_records: 0,
            received_records: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn offset(&self) -> [i8; 3] {
        self.offset
    }

    pub fn state(&self) -> PartnerState {
        self.state
    }

    pub fn is_face_partner(&self) -> bool {
        self.offset.iter().filter(|o| **o != 0).count() == 1
    }

    /// The axis of a face partner.
    pub fn face_axis(&self) -> Option<usize> {
        if self.is_face_partner() {
            (0..3).find(|&d| self.offset[d] != 0)
        } else {
            None
        }
    }

    /// Widen the exchanged regions in every axis but `axis` (three-stage
    /// forwarding of ghosts to edge and corner neighbours).
    pub fn enlarge_in_other_directions(&mut self, axis: usize, cutoff: f64) {
        for d in 0..3 {
            if d != axis {
                self.copy_region.0[d] -= cutoff;
                self.copy_region.1[d] += cutoff;
                self.leaving_region.0[d] -= cutoff;
                self.leaving_region.1[d] += cutoff;
            }
        }
    }

    /// Pack the outgoing molecules and post the send.
    pub fn init_send(
        &mut self,
        container: &mut LinkedCells,
        endpoint: &Endpoint,
        stage: u8,
        msg_type: MessageType,
    ) -> Result<()> {
        let mut records: Vec<MoleculeRecord> = Vec::new();

        if msg_type != MessageType::HaloCopies {
            // Owners that moved into the peer's territory: remove locally.
            records.extend(
                container
                    .extract_region(self.leaving_region.0, self.leaving_region.1, true)
                    .into_iter()
                    .map(|r| r.shifted(self.shift)),
            );
        }
        if msg_type != MessageType::LeavingOnly {
            // Ghost copies stay owned here; ghosts of earlier stages are
            // forwarded along (the widened regions cover them).
            records.extend(
                container
                    .collect_region(self.copy_region.0, self.copy_region.1, true)
                    .into_iter()
                    .map(|r| r.shifted(self.shift)),
            );
        }

        self.sent_records = records.len();
        self.state = PartnerState::Sending;
        endpoint.send(
            self.rank,
            Packet::Particles {
                stage,
                dir: self.offset,
                records,
            },
        )?;
        Ok(())
    }

    /// Progress the send. Channel sends complete on posting, so this
    /// advances straight to waiting for the peer's count.
    pub fn test_send(&mut self) -> bool {
        if self.state == PartnerState::Sending {
            self.state = PartnerState::AwaitingCount;
        }
        !matches!(self.state, PartnerState::Idle | PartnerState::Sending)
    }

    /// Probe for the incoming message size; once a message is queued the
    /// partner moves on to receiving.
    pub fn probe_count(&mut self, endpoint: &mut Endpoint, stage: u8) -> bool {
        if self.state == PartnerState::AwaitingCount {
            let expected_dir = [-self.offset[0], -self.offset[1], -self.offset[2]];
            if endpoint.has_particles(self.rank, stage, expected_dir) {
                self.state = PartnerState::Receiving;
            }
        }
        matches!(self.state, PartnerState::Receiving | PartnerState::Done)
    }

    /// Complete the receive: unpack molecules into the container.
    pub fn test_recv(
        &mut self,
        container: &mut LinkedCells,
        endpoint: &mut Endpoint,
        stage: u8,
        remove_duplicates: bool,
    ) -> bool {
        if self.state == PartnerState::Receiving {
            let expected_dir = [-self.offset[0], -self.offset[1], -self.offset[2]];
            if let Some(records) = endpoint.try_take_particles(self.rank, stage, expected_dir) {
                self.received_records = records.len();
                for rec in records {
                    if remove_duplicates {
                        container.insert_deduplicated(rec);
                    } else {
                        container.insert(rec.into_molecule());
                    }
                }
                self.state = PartnerState::Done;
            }
        }
        self.state == PartnerState::Done
    }

    pub fn reset(&mut self) {
        self.state = PartnerState::Idle;
        self.sent_records = 0;
        self.received_records = 0;
    }

    /// One line of the deadlock diagnostic.
    pub fn deadlock_diagnostic(&self, own_rank: usize) {
        log::warn!(
            "rank {}: partner rank {} offset {:?} state {:?} (sent {}, received {})",
            own_rank,
            self.rank,
            self.offset,
            self.state,
            self.sent_records,
            self.received_records
        );
    }

    /// Summary used by the fatal deadlock report.
    pub fn state_summary(&self) -> String {
        format!(
            "rank {} offset {:?} {:?}",
            self.rank, self.offset, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partner(offset: [i8; 3]) -> CommunicationPartner {
        CommunicationPartner::new(
            1,
            offset,
            ([0.0; 3], [1.0; 3]),
            ([1.0, 0.0, 0.0], [2.0, 1.0, 1.0]),
            [0.0; 3],
        )
    }

    #[test]
    fn test_face_partner_detection() {
        assert!(partner([1, 0, 0]).is_face_partner());
        assert_eq!(partner([0, -1, 0]).face_axis(), Some(1));
        assert!(!partner([1, 1, 0]).is_face_partner());
        assert_eq!(partner([1, 1, 0]).face_axis(), None);
    }

    #[test]
    fn test_enlarge_keeps_own_axis() {
        let mut p = partner([1, 0, 0]);
        p.enlarge_in_other_directions(0, 0.5);
        assert_eq!(p.copy_region.0, [0.0, -0.5, -0.5]);
        assert_eq!(p.copy_region.1, [1.0, 1.5, 1.5]);
    }

    #[test]
    fn test_state_machine_without_traffic() {
        let mut p = partner([1, 0, 0]);
        assert_eq!(p.state(), PartnerState::Idle);
        assert!(!p.test_send()); // nothing posted yet
        p.state = PartnerState::Sending;
        assert!(p.test_send());
        assert_eq!(p.state(), PartnerState::AwaitingCount);
    }
}
