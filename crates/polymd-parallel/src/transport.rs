//! In-process rank transport.
//!
//! Ranks run on threads and exchange tagged packets over channels. The
//! seam mirrors a message-passing runtime: sends are non-blocking,
//! receives are polled, and collectives are blocking calls routed through
//! rank 0. A [`FaultPlan`] can drop particle sends to a chosen peer to
//! exercise the deadlock guard.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::time::{Duration, Instant};

use polymd_core::errors::{PolymdError, Result};
use polymd_core::molecule::MoleculeRecord;

/// Timeout for blocking collectives.
const COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub enum Packet {
    /// Halo/leaving molecules for one exchange stage. `dir` is the
    /// sender's neighbour offset, so the receiver can match the packet
    /// to the mirrored partner.
    Particles {
        stage: u8,
        dir: [i8; 3],
        records: Vec<MoleculeRecord>,
    },
    /// One rank's contribution to an element-wise sum.
    Reduce(Vec<f64>),
    /// The reduced result, root to everyone.
    Broadcast(Vec<f64>),
    /// One rank's molecules for a root-side gather.
    Gather(Vec<MoleculeRecord>),
}

/// Drops selected traffic; used by tests to force a deadlock.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Silently drop particle packets sent to this rank.
    pub drop_particle_sends_to: Option<usize>,
}

struct Envelope {
    from: usize,
    packet: Packet,
}

/// One rank's endpoint of the transport.
pub struct Endpoint {
    rank: usize,
    size: usize,
    txs: Vec<Sender<Envelope>>,
    rx: Receiver<Envelope>,
    particle_inbox: HashMap<(usize, u8, [i8; 3]), VecDeque<Vec<MoleculeRecord>>>,
    reduce_inbox: VecDeque<Vec<f64>>,
    broadcast_inbox: VecDeque<Vec<f64>>,
    gather_inbox: VecDeque<Vec<MoleculeRecord>>,
    fault: FaultPlan,
}

impl Endpoint {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_fault_plan(&mut self, plan: FaultPlan) {
        self.fault = plan;
    }

    /// Non-blocking send. A dropped peer (fault plan) swallows particle
    /// packets silently; a disconnected peer is a communication error.
    pub fn send(&self, to: usize, packet: Packet) -> Result<()> {
        if let Packet::Particles { .. } = packet {
            if self.fault.drop_particle_sends_to == Some(to) {
                log::debug!("rank {}: fault plan dropped particle send to {}", self.rank, to);
                return Ok(());
            }
        }
        self.txs[to]
            .send(Envelope {
                from: self.rank,
                packet,
            })
            .map_err(|_| {
                PolymdError::communication(format!("rank {} is disconnected", to))
            })
    }

    /// Drain the channel into the typed inboxes.
    pub fn poll(&mut self) {
        while let Ok(env) = self.rx.try_recv() {
            match env.packet {
                Packet::Particles { stage, dir, records } => {
                    self.particle_inbox
                        .entry((env.from, stage, dir))
                        .or_default()
                        .push_back(records);
                }
                Packet::Reduce(v) => self.reduce_inbox.push_back(v),
                Packet::Broadcast(v) => self.broadcast_inbox.push_back(v),
                Packet::Gather(v) => self.gather_inbox.push_back(v),
            }
        }
    }

    /// True if a particle message matching (peer, stage, sender offset)
    /// is queued; the count is known once the message arrived.
    pub fn has_particles(&self, from: usize, stage: u8, dir: [i8; 3]) -> bool {
        self.particle_inbox
            .get(&(from, stage, dir))
            .is_some_and(|q| !q.is_empty())
    }

    /// Take one particle message matching (peer, stage, sender offset).
    pub fn try_take_particles(
        &mut self,
        from: usize,
        stage: u8,
        dir: [i8; 3],
    ) -> Option<Vec<MoleculeRecord>> {
        self.particle_inbox
            .get_mut(&(from, stage, dir))
            .and_then(|q| q.pop_front())
    }

    /// Blocking element-wise sum across all ranks.
    pub fn allreduce_sum(&mut self, values: &[f64]) -> Result<Vec<f64>> {
        if self.size == 1 {
            return Ok(values.to_vec());
        }
        if self.rank == 0 {
            let mut sum = values.to_vec();
            let mut pending = self.size - 1;
            let start = Instant::now();
            while pending > 0 {
                self.poll();
                while let Some(v) = self.reduce_inbox.pop_front() {
                    for (s, x) in sum.iter_mut().zip(v.iter()) {
                        *s += x;
                    }
                    pending -= 1;
                }
                if pending > 0 {
                    self.wait_tick(start, "allreduce")?;
                }
            }
            for to in 1..self.size {
                self.send(to, Packet::Broadcast(sum.clone()))?;
            }
            Ok(sum)
        } else {
            self.send(0, Packet::Reduce(values.to_vec()))?;
            let start = Instant::now();
            loop {
                self.poll();
                if let Some(v) = self.broadcast_inbox.pop_front() {
                    return Ok(v);
                }
                self.wait_tick(start, "allreduce")?;
            }
        }
    }

    /// Blocking gather to rank 0; non-roots get `None` back.
    pub fn gather_to_root(
        &mut self,
        records: Vec<MoleculeRecord>,
    ) -> Result<Option<Vec<MoleculeRecord>>> {
        if self.size == 1 {
            return Ok(Some(records));
        }
        if self.rank == 0 {
            let mut all = records;
            let mut pending = self.size - 1;
            let start = Instant::now();
            while pending > 0 {
                self.poll();
                while let Some(v) = self.gather_inbox.pop_front() {
                    all.extend(v);
                    pending -= 1;
                }
                if pending > 0 {
                    self.wait_tick(start, "gather")?;
                }
            }
            Ok(Some(all))
        } else {
            self.send(0, Packet::Gather(records))?;
            Ok(None)
        }
    }

    /// Blocking synchronization point (an empty reduction).
    pub fn barrier(&mut self) -> Result<()> {
        self.allreduce_sum(&[]).map(|_| ())
    }

    fn wait_tick(&self, start: Instant, what: &str) -> Result<()> {
        if start.elapsed() > COLLECTIVE_TIMEOUT {
            return Err(PolymdError::communication(format!(
                "rank {}: {} did not complete within {:?}",
                self.rank, what, COLLECTIVE_TIMEOUT
            )));
        }
        std::thread::yield_now();
        Ok(())
    }
}

/// Builds a fully connected set of endpoints, one per rank.
pub struct LocalRing;

impl LocalRing {
    pub fn connect(size: usize) -> Vec<Endpoint> {
        let mut txs = Vec::with_capacity(size);
        let mut rxs = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = channel();
            txs.push(tx);
            rxs.push(rx);
        }
        rxs.into_iter()
            .enumerate()
            .map(|(rank, rx)| Endpoint {
                rank,
                size,
                txs: txs.clone(),
                rx,
                particle_inbox: HashMap::new(),
                reduce_inbox: VecDeque::new(),
                broadcast_inbox: VecDeque::new(),
                gather_inbox: VecDeque::new(),
                fault: FaultPlan::default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymd_core::math::Quat;

    fn record(id: u64) -> MoleculeRecord {
        MoleculeRecord {
            id,
            component_id: 0,
            r: [0.0; 3],
            v: [0.0; 3],
            q: Quat::identity(),
            d: [0.0; 3],
        }
    }

    #[test]
    fn test_particle_routing_by_tag() {
        let mut eps = LocalRing::connect(2);
        let e1 = eps.pop().unwrap();
        let mut e0 = eps.pop().unwrap();

        e1.send(
            0,
            Packet::Particles {
                stage: 0,
                dir: [-1, 0, 0],
                records: vec![record(7)],
            },
        )
        .unwrap();

        e0.poll();
        assert!(e0.try_take_particles(1, 0, [1, 0, 0]).is_none());
        let got = e0.try_take_particles(1, 0, [-1, 0, 0]).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, 7);
    }

    #[test]
    fn test_allreduce_two_ranks() {
        let mut eps = LocalRing::connect(2);
        let mut e1 = eps.pop().unwrap();
        let mut e0 = eps.pop().unwrap();

        let t = std::thread::spawn(move || e1.allreduce_sum(&[1.0, 2.0]).unwrap());
        let sum0 = e0.allreduce_sum(&[10.0, 20.0]).unwrap();
        let sum1 = t.join().unwrap();
        assert_eq!(sum0, vec![11.0, 22.0]);
        assert_eq!(sum1, vec![11.0, 22.0]);
    }

    #[test]
    fn test_fault_plan_drops_particles_only() {
        let mut eps = LocalRing::connect(2);
        let mut e1 = eps.pop().unwrap();
        let mut e0 = eps.pop().unwrap();
        e0.set_fault_plan(FaultPlan {
            drop_particle_sends_to: Some(1),
        });

        e0.send(
            1,
            Packet::Particles {
                stage: 0,
                dir: [1, 0, 0],
                records: vec![record(1)],
            },
        )
        .unwrap();
        e0.send(1, Packet::Broadcast(vec![5.0])).unwrap();

        e1.poll();
        assert!(e1.try_take_particles(0, 0, [1, 0, 0]).is_none());
        assert_eq!(e1.broadcast_inbox.pop_front().unwrap(), vec![5.0]);
    }

    #[test]
    fn test_disconnected_peer_is_an_error() {
        let mut eps = LocalRing::connect(2);
        let e1 = eps.pop().unwrap();
        let e0 = eps.pop().unwrap();
        drop(e1);
        assert!(e0.send(1, Packet::Broadcast(vec![])).is_err());
    }
}
