//! Fixtures shared by unit tests.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use bitcoin::{
    CompactTarget, TxMerkleNode,
    block::{Header as InnerHeader, Version},
    hashes::Hash,
};

use crate::{
    blockdata::{
        GenesisInfo,
        block::{BlockHash, Header},
    },
    chain::{Checkpoint, ForkPoint},
    interface::{FastChain, MemoryChain, StoreError, StoreResult},
    mutex::{PrioritizedMutex, Priority, PriorityLock},
    pow::{ProofOfWork, Sha256dProofOfWork, Work},
};

/// Regtest proof-of-work limit in compact form.
pub const REGTEST_BITS: u32 = 0x207f_ffff;

const VERSION: i32 = 0x2000_0000;
const SPACING: u32 = 60;

pub fn genesis() -> Header {
    GenesisInfo::regtest().to_header()
}

fn header(previous: BlockHash, time: u32, version: i32, merkle: [u8; 32]) -> Header {
    Header::new(InnerHeader {
        version: Version::from_consensus(version),
        prev_blockhash: previous,
        merkle_root: TxMerkleNode::from_byte_array(merkle),
        time,
        bits: CompactTarget::from_consensus(REGTEST_BITS),
        nonce: 0,
    })
}

/// A regtest header with a zero nonce; its proof of work is not searched.
pub fn unmined(previous: BlockHash, time: u32) -> Header {
    header(previous, time, VERSION, [0; 32])
}

/// Searches the nonce of `header` until it meets its own target.
fn solve(header: Header, pow: &dyn ProofOfWork) -> Header {
    let target = header.target().unwrap();
    let mut inner = *header.inner();
    loop {
        let candidate = Header::new(inner);
        if target.is_met_by(&pow.pow_hash(&candidate).unwrap()) {
            return candidate;
        }
        inner.nonce += 1;
    }
}

pub fn mine(previous: BlockHash, time: u32) -> Header {
    mine_with(previous, time, &Sha256dProofOfWork)
}

pub fn mine_with(previous: BlockHash, time: u32, pow: &dyn ProofOfWork) -> Header {
    solve(unmined(previous, time), pow)
}

/// `parent` followed by `count` mined descendants one minute apart.
///
/// `salt` shifts timestamps and merkle roots so that chains built from the
/// same parent diverge.
pub fn build_chain(parent: Header, count: u32, salt: u8) -> Vec<Header> {
    build_chain_with(parent, count, salt, |_| VERSION)
}

/// Like [`build_chain`], with the version of each header chosen by its index
/// in the result.
pub fn build_chain_with(
    parent: Header,
    count: u32,
    salt: u8,
    version: impl Fn(u32) -> i32,
) -> Vec<Header> {
    let mut headers = vec![parent];
    for index in 1..=count {
        let previous = headers.last().unwrap();
        let time = parent.timestamp() + SPACING * index + u32::from(salt);
        let next = header(previous.block_hash(), time, version(index), [salt; 32]);
        headers.push(solve(next, &Sha256dProofOfWork));
    }
    headers
}

/// [`MemoryChain`] with injectable failures and call accounting.
#[derive(Debug)]
pub struct FailingChain {
    inner: MemoryChain,
    lookup_failure: Mutex<Option<StoreError>>,
    header_failure: Mutex<Option<(u32, StoreError)>>,
    work_failure: Mutex<Option<StoreError>>,
    reorganize_failure: Mutex<Option<StoreError>>,
    required_work: Mutex<Option<Work>>,
    reorganizations: Mutex<Vec<(Checkpoint, Vec<Header>)>>,
    reorganize_attempts: AtomicUsize,
    lookups: AtomicUsize,
}

impl FailingChain {
    pub fn new(inner: MemoryChain) -> Self {
        FailingChain {
            inner,
            lookup_failure: Mutex::new(None),
            header_failure: Mutex::new(None),
            work_failure: Mutex::new(None),
            reorganize_failure: Mutex::new(None),
            required_work: Mutex::new(None),
            reorganizations: Mutex::new(Vec::new()),
            reorganize_attempts: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Fails every header and height lookup from now on.
    pub fn fail_lookups(&self, error: StoreError) {
        *self.lookup_failure.lock().unwrap() = Some(error);
    }

    /// Fails header lookups at `height` on either index from now on.
    pub fn fail_header_at(&self, height: u32, error: StoreError) {
        *self.header_failure.lock().unwrap() = Some((height, error));
    }

    pub fn fail_work(&self, error: StoreError) {
        *self.work_failure.lock().unwrap() = Some(error);
    }

    pub fn fail_reorganize(&self, error: StoreError) {
        *self.reorganize_failure.lock().unwrap() = Some(error);
    }

    /// Overrides the work reported above any fork point.
    pub fn set_required_work(&self, work: Option<Work>) {
        *self.required_work.lock().unwrap() = work;
    }

    /// Successful reorganizations, oldest first.
    pub fn reorganizations(&self) -> Vec<(Checkpoint, Vec<Header>)> {
        self.reorganizations.lock().unwrap().clone()
    }

    pub fn reorganize_attempts(&self) -> usize {
        self.reorganize_attempts.load(Ordering::SeqCst)
    }

    /// Number of header and height lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn lookup(&self) -> StoreResult<()> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        match self.lookup_failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl FastChain for FailingChain {
    fn get_work(&self, maximum: Work, above_height: u32, candidate: bool) -> StoreResult<Work> {
        if let Some(error) = self.work_failure.lock().unwrap().clone() {
            return Err(error);
        }
        if let Some(work) = *self.required_work.lock().unwrap() {
            return Ok(work);
        }
        self.inner.get_work(maximum, above_height, candidate)
    }

    fn reorganize(&self, fork_point: &ForkPoint, incoming: &[Header]) -> StoreResult<Vec<Header>> {
        self.reorganize_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.reorganize_failure.lock().unwrap().clone() {
            return Err(error);
        }
        let outgoing = self.inner.reorganize(fork_point, incoming)?;
        self.reorganizations
            .lock()
            .unwrap()
            .push((*fork_point, incoming.to_vec()));
        Ok(outgoing)
    }

    fn get_header(&self, height: u32, candidate: bool) -> StoreResult<Option<Header>> {
        self.lookup()?;
        if let Some((failing, error)) = self.header_failure.lock().unwrap().clone() {
            if failing == height {
                return Err(error);
            }
        }
        self.inner.get_header(height, candidate)
    }

    fn get_height(&self, hash: &BlockHash, candidate: bool) -> StoreResult<Option<u32>> {
        self.lookup()?;
        self.inner.get_height(hash, candidate)
    }

    fn top(&self, candidate: bool) -> StoreResult<Option<Checkpoint>> {
        self.inner.top(candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    Lock(Priority),
    Unlock(Priority),
}

/// [`PrioritizedMutex`] that records every lock and unlock.
#[derive(Debug, Default)]
pub struct RecordingLock {
    inner: PrioritizedMutex,
    events: Mutex<Vec<LockEvent>>,
}

impl RecordingLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LockEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

impl PriorityLock for RecordingLock {
    fn lock(&self, priority: Priority) {
        self.inner.lock(priority);
        self.events.lock().unwrap().push(LockEvent::Lock(priority));
    }

    fn unlock(&self, priority: Priority) {
        self.events.lock().unwrap().push(LockEvent::Unlock(priority));
        self.inner.unlock(priority);
    }
}
