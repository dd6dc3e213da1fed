//! Thin façade over intra-process (Rayon) or inter-process (MPI) message passing.
//!
//! The assembler only ever talks to other processes through collectives over
//! the whole group, so the [`Communicator`] trait is expressed in terms of
//! byte-level all-to-all and all-gather exchanges. Typed wrappers live in
//! [`crate::algs::collective`].
//!
//! Messages between one pair of ranks under one tag are delivered in the order
//! they were sent, so the same tag may be reused by successive collectives.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::mesh_error::AssemblerError;

/// Tag attached to every message of one collective.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Derive a related tag, e.g. for the second phase of an exchange.
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags of the collectives issued by the assembler.
pub mod tags {
    use super::CommTag;

    pub const OWNERSHIP: CommTag = CommTag::new(0x0A00);
    pub const EXT_NODES: CommTag = CommTag::new(0x0A10);
    pub const BC_EXCHANGE: CommTag = CommTag::new(0x0A20);
    pub const REORDER: CommTag = CommTag::new(0x0A30);
    pub const HALO_VALUES: CommTag = CommTag::new(0x0A50);
    pub const MAT_PATTERN: CommTag = CommTag::new(0x0A60);
    pub const MAT_VALUES: CommTag = CommTag::new(0x0A70);
    pub const REDUCE: CommTag = CommTag::new(0x0A80);
    pub const BARRIER: CommTag = CommTag::new(0x0AF0);
}

/// Collective communication over a fixed process group.
pub trait Communicator {
    /// Rank of this process in `[0, size)`.
    fn rank(&self) -> usize;
    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Send `sends[p]` to every rank `p` (including self) and return the
    /// message received from every rank, indexed by source rank.
    fn all_to_all_bytes(
        &self,
        tag: CommTag,
        sends: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, AssemblerError>;

    /// Gather `data` from every rank, indexed by source rank.
    fn all_gather_bytes(&self, tag: CommTag, data: &[u8]) -> Result<Vec<Vec<u8>>, AssemblerError> {
        let sends = vec![data.to_vec(); self.size()];
        self.all_to_all_bytes(tag, &sends)
    }

    /// Block until every rank reaches this point.
    fn barrier(&self) -> Result<(), AssemblerError> {
        self.all_gather_bytes(tags::BARRIER, &[]).map(|_| ())
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn all_to_all_bytes(
        &self,
        _tag: CommTag,
        sends: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, AssemblerError> {
        check_send_count(sends.len(), 1)?;
        Ok(sends.to_vec())
    }
}

fn check_send_count(got: usize, size: usize) -> Result<(), AssemblerError> {
    if got != size {
        return Err(AssemblerError::InvalidOption(format!(
            "all-to-all needs one message per rank ({size}), got {got}"
        )));
    }
    Ok(())
}

// --- RayonComm: in-process ranks, one thread per rank ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// How long a receive waits before the peer is given up on.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(300);

/// Message queues shared by the ranks of one group. Senders push under
/// `lock` and wake every waiting receiver.
#[derive(Debug, Default)]
struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
    lock: Mutex<()>,
    arrived: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, bytes: Bytes) {
        let _guard = self.lock.lock();
        self.queues.entry(key).or_default().push_back(bytes);
        self.arrived.notify_all();
    }

    fn try_take(&self, key: &Key) -> Option<Bytes> {
        self.queues.get_mut(key).and_then(|mut q| q.pop_front())
    }
}

/// In-process communicator: every rank of a group lives on its own thread and
/// all ranks share one mailbox.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
}

/// Receive handle of [`RayonComm::irecv`].
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    timeout: Duration,
}

impl Wait for LocalHandle {
    /// Block until the message arrives; `None` once the timeout passes.
    fn wait(self) -> Option<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut guard = self.mailbox.lock.lock();
        loop {
            if let Some(bytes) = self.mailbox.try_take(&self.key) {
                return Some(bytes.to_vec());
            }
            if self.mailbox.arrived.wait_until(&mut guard, deadline).timed_out() {
                return self.mailbox.try_take(&self.key).map(|b| b.to_vec());
            }
        }
    }
}

impl RayonComm {
    /// Create the `size` ranks of one group sharing a mailbox.
    pub fn group(size: usize) -> Vec<RayonComm> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| RayonComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                timeout: DEFAULT_RECV_TIMEOUT,
            })
            .collect()
    }

    /// Give up on a receive after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Post a message; delivery is immediate.
    pub fn isend(&self, peer: usize, tag: CommTag, buf: &[u8]) {
        let key = (self.rank, peer, tag.as_u16());
        self.mailbox.post(key, Bytes::copy_from_slice(buf));
    }

    /// Post a receive; [`Wait::wait`] blocks until the next message arrives.
    pub fn irecv(&self, peer: usize, tag: CommTag) -> LocalHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag.as_u16()),
            timeout: self.timeout,
        }
    }
}

impl Communicator for RayonComm {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn all_to_all_bytes(
        &self,
        tag: CommTag,
        sends: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>, AssemblerError> {
        check_send_count(sends.len(), self.size)?;
        let recvs: Vec<(usize, LocalHandle)> = (0..self.size)
            .filter(|&p| p != self.rank)
            .map(|p| (p, self.irecv(p, tag)))
            .collect();
        for (peer, buf) in sends.iter().enumerate() {
            if peer != self.rank {
                self.isend(peer, tag, buf);
            }
        }
        let mut out = vec![Vec::new(); self.size];
        out[self.rank] = sends[self.rank].clone();
        let mut first_err = None;
        for (peer, h) in recvs {
            match h.wait() {
                Some(data) => out[peer] = data,
                None if first_err.is_none() => {
                    first_err = Some(AssemblerError::CommError {
                        neighbor: peer,
                        source: "no message before the receive timeout".into(),
                    });
                }
                None => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// Communicator over `MPI_COMM_WORLD` using native collectives.
    pub struct MpiComm {
        // Keeps MPI initialized for the lifetime of the communicator.
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, AssemblerError> {
            let universe = mpi::initialize().ok_or_else(|| {
                AssemblerError::InvalidOption("MPI already initialized".into())
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    fn displs(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect()
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn all_to_all_bytes(
            &self,
            _tag: CommTag,
            sends: &[Vec<u8>],
        ) -> Result<Vec<Vec<u8>>, AssemblerError> {
            check_send_count(sends.len(), self.size)?;
            let send_counts: Vec<Count> = sends.iter().map(|s| s.len() as Count).collect();
            let mut recv_counts: Vec<Count> = vec![0; self.size];
            self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);

            let send_buf: Vec<u8> = sends.concat();
            let send_displs = displs(&send_counts);
            let recv_displs = displs(&recv_counts);
            let total: usize = recv_counts.iter().map(|&c| c as usize).sum();
            let mut recv_buf = vec![0u8; total];
            {
                let send = Partition::new(&send_buf[..], &send_counts[..], &send_displs[..]);
                let mut recv =
                    PartitionMut::new(&mut recv_buf[..], &recv_counts[..], &recv_displs[..]);
                self.world.all_to_all_varcount_into(&send, &mut recv);
            }
            Ok(recv_counts
                .iter()
                .zip(&recv_displs)
                .map(|(&c, &d)| recv_buf[d as usize..(d + c) as usize].to_vec())
                .collect())
        }

        fn barrier(&self) -> Result<(), AssemblerError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let comms = RayonComm::group(2);
        let (c0, c1) = (comms[0].clone(), comms[1].clone());
        let recv = c1.irecv(0, CommTag::new(7));
        c0.isend(1, CommTag::new(7), &[1, 2, 3, 4]);
        let data = recv.wait().expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rayon_messages_are_fifo_per_tag() {
        let comms = RayonComm::group(2);
        comms[0].isend(1, CommTag::new(3), &[1]);
        comms[0].isend(1, CommTag::new(3), &[2]);
        assert_eq!(comms[1].irecv(0, CommTag::new(3)).wait(), Some(vec![1]));
        assert_eq!(comms[1].irecv(0, CommTag::new(3)).wait(), Some(vec![2]));
    }

    #[test]
    fn rayon_all_to_all_three_ranks() {
        let comms = RayonComm::group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                std::thread::spawn(move || {
                    let r = c.rank() as u8;
                    let sends: Vec<Vec<u8>> = (0..3).map(|p| vec![r, p as u8]).collect();
                    c.all_to_all_bytes(CommTag::new(1), &sends).unwrap()
                })
            })
            .collect();
        for (rank, h) in handles.into_iter().enumerate() {
            let got = h.join().unwrap();
            for (src, msg) in got.iter().enumerate() {
                assert_eq!(msg, &vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn waiting_receiver_wakes_on_late_send() {
        let comms = RayonComm::group(2);
        let sender = comms[0].clone();
        let recv = comms[1].irecv(0, CommTag::new(5));
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.isend(1, CommTag::new(5), &[42]);
        });
        assert_eq!(recv.wait(), Some(vec![42]));
        t.join().unwrap();
    }

    #[test]
    fn silent_peer_times_out() {
        let comms: Vec<RayonComm> = RayonComm::group(2)
            .into_iter()
            .map(|c| c.with_timeout(Duration::from_millis(30)))
            .collect();
        assert_eq!(comms[1].irecv(0, CommTag::new(9)).wait(), None);
        // Rank 1 never joins the exchange.
        let err = comms[0]
            .all_to_all_bytes(CommTag::new(9), &[vec![1], vec![2]])
            .unwrap_err();
        assert!(matches!(err, AssemblerError::CommError { neighbor: 1, .. }));
    }

    #[test]
    fn nocomm_is_identity() {
        let out = NoComm.all_to_all_bytes(CommTag::new(0), &[vec![9]]).unwrap();
        assert_eq!(out, vec![vec![9]]);
        assert!(NoComm.all_to_all_bytes(CommTag::new(0), &[]).is_err());
    }
}
