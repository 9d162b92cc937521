//! Persistent [`FastChain`] using redb.
//!
//! Headers are stored once by hash. Each of the candidate and confirmed
//! chains keeps a pair of tables mapping height to hash and hash to height.
//! A reorganization rewrites the candidate tables in a single write
//! transaction, so a failed write leaves the previous candidate chain intact.

use std::path::{Path, PathBuf};

use bitcoin::hashes::Hash;
use redb::{
    CommitError, Database, DatabaseError as RedbError, ReadableTable, ReadableTableMetadata,
    StorageError, TableDefinition, TableError, TransactionError,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    blockdata::block::{BlockHash, Header, header::HeaderDecodeError},
    chain::{Checkpoint, ForkPoint},
    interface::{FastChain, StoreError, StoreResult},
    pow::Work,
};

/// Errors raised by [`DatabaseChain`].
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Error from the underlying redb database engine.
    #[error("Database error: {0}")]
    Redb(#[from] RedbError),

    /// A transaction could not be started.
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A transaction could not be committed.
    #[error("Commit error: {0}")]
    Commit(#[from] CommitError),

    /// Error from the storage layer.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A table could not be opened.
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    /// The database directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored header could not be decoded.
    #[error("Header decoding error: {0}")]
    Decode(#[from] HeaderDecodeError),

    /// The fork point of a reorganization is not on the candidate chain.
    #[error("Fork point {0} is not on the candidate chain")]
    ForkPoint(Checkpoint),

    /// The stored tables disagree with each other.
    #[error("Invalid database state: {0}")]
    InvalidState(String),
}

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

impl From<DatabaseError> for StoreError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::ForkPoint(_) => StoreError::ForkPointMismatch,
            error => StoreError::Backend(error.to_string()),
        }
    }
}

const HEADERS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("headers");
const CANDIDATE_INDEX_TABLE: TableDefinition<u32, &[u8]> =
    TableDefinition::new("candidate_index");
const CONFIRMED_INDEX_TABLE: TableDefinition<u32, &[u8]> =
    TableDefinition::new("confirmed_index");
const CANDIDATE_HEIGHTS_TABLE: TableDefinition<&[u8], u32> =
    TableDefinition::new("candidate_heights");
const CONFIRMED_HEIGHTS_TABLE: TableDefinition<&[u8], u32> =
    TableDefinition::new("confirmed_heights");

fn index_table(candidate: bool) -> TableDefinition<'static, u32, &'static [u8]> {
    if candidate {
        CANDIDATE_INDEX_TABLE
    } else {
        CONFIRMED_INDEX_TABLE
    }
}

fn heights_table(candidate: bool) -> TableDefinition<'static, &'static [u8], u32> {
    if candidate {
        CANDIDATE_HEIGHTS_TABLE
    } else {
        CONFIRMED_HEIGHTS_TABLE
    }
}

fn decode_hash(bytes: &[u8]) -> DatabaseResult<BlockHash> {
    <[u8; 32]>::try_from(bytes)
        .map(BlockHash::from_byte_array)
        .map_err(|_| DatabaseError::InvalidState(format!("hash of {} bytes", bytes.len())))
}

fn read_hash(
    index: &impl ReadableTable<u32, &'static [u8]>,
    height: u32,
) -> DatabaseResult<Option<BlockHash>> {
    index
        .get(height)?
        .map(|hash| decode_hash(hash.value()))
        .transpose()
}

fn read_header(
    headers: &impl ReadableTable<&'static [u8], &'static [u8]>,
    hash: &BlockHash,
) -> DatabaseResult<Header> {
    let bytes = headers
        .get(hash.as_byte_array().as_slice())?
        .ok_or_else(|| DatabaseError::InvalidState(format!("indexed header {hash} is missing")))?;
    Ok(Header::from_bytes(bytes.value())?)
}

/// Header chain stored in a redb database.
#[derive(Debug)]
pub struct DatabaseChain {
    db: Database,
    path: PathBuf,
}

impl DatabaseChain {
    /// Opens or creates a database at `path`.
    ///
    /// A new database starts with `genesis` at height zero of both chains.
    pub fn open<P: AsRef<Path>>(path: P, genesis: Header) -> DatabaseResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&path)?;

        let write_txn = db.begin_write()?;
        {
            let mut headers = write_txn.open_table(HEADERS_TABLE)?;
            let hash = genesis.block_hash();
            let hash = hash.as_byte_array().as_slice();

            for candidate in [true, false] {
                let mut index = write_txn.open_table(index_table(candidate))?;
                let mut heights = write_txn.open_table(heights_table(candidate))?;
                if index.len()? == 0 {
                    headers.insert(hash, genesis.to_bytes().as_slice())?;
                    index.insert(0, hash)?;
                    heights.insert(hash, 0)?;
                }
            }
        }
        write_txn.commit()?;

        info!("Opened header database at: {}", path.display());
        Ok(Self { db, path })
    }

    /// Gets the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn work_above(
        &self,
        maximum: Work,
        above_height: u32,
        candidate: bool,
    ) -> DatabaseResult<Work> {
        let Some(start) = above_height.checked_add(1) else {
            return Ok(Work::ZERO);
        };

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index_table(candidate))?;
        let headers = read_txn.open_table(HEADERS_TABLE)?;

        let mut work = Work::ZERO;
        for entry in index.range(start..)? {
            let (_, hash) = entry?;
            let header = read_header(&headers, &decode_hash(hash.value())?)?;
            work = work.saturating_add(header.work());
            if work > maximum {
                break;
            }
        }
        Ok(work)
    }

    fn replace_candidate(
        &self,
        fork_point: &ForkPoint,
        incoming: &[Header],
    ) -> DatabaseResult<Vec<Header>> {
        let start = fork_point
            .height
            .checked_add(1)
            .ok_or(DatabaseError::ForkPoint(*fork_point))?;

        let write_txn = self.db.begin_write()?;
        let outgoing = {
            let mut headers = write_txn.open_table(HEADERS_TABLE)?;
            let mut index = write_txn.open_table(CANDIDATE_INDEX_TABLE)?;
            let mut heights = write_txn.open_table(CANDIDATE_HEIGHTS_TABLE)?;

            if read_hash(&index, fork_point.height)? != Some(fork_point.hash) {
                return Err(DatabaseError::ForkPoint(*fork_point));
            }

            let above = index
                .range(start..)?
                .map(|entry| {
                    let (height, hash) = entry?;
                    Ok((height.value(), decode_hash(hash.value())?))
                })
                .collect::<DatabaseResult<Vec<_>>>()?;

            let mut outgoing = Vec::with_capacity(above.len());
            for (height, hash) in above {
                outgoing.push(read_header(&headers, &hash)?);
                index.remove(height)?;
                heights.remove(hash.as_byte_array().as_slice())?;
            }

            for (header, height) in incoming.iter().zip(start..) {
                let hash = header.block_hash();
                let hash = hash.as_byte_array().as_slice();
                headers.insert(hash, header.to_bytes().as_slice())?;
                index.insert(height, hash)?;
                heights.insert(hash, height)?;
            }
            outgoing
        };
        write_txn.commit()?;

        debug!(
            fork_height = fork_point.height,
            incoming = incoming.len(),
            outgoing = outgoing.len(),
            "Reorganized candidate chain"
        );
        Ok(outgoing)
    }

    fn header_at(&self, height: u32, candidate: bool) -> DatabaseResult<Option<Header>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index_table(candidate))?;
        let Some(hash) = read_hash(&index, height)? else {
            return Ok(None);
        };
        let headers = read_txn.open_table(HEADERS_TABLE)?;
        read_header(&headers, &hash).map(Some)
    }

    fn height_of(&self, hash: &BlockHash, candidate: bool) -> DatabaseResult<Option<u32>> {
        let read_txn = self.db.begin_read()?;
        let heights = read_txn.open_table(heights_table(candidate))?;
        Ok(heights
            .get(hash.as_byte_array().as_slice())?
            .map(|height| height.value()))
    }

    fn top_of(&self, candidate: bool) -> DatabaseResult<Option<Checkpoint>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(index_table(candidate))?;
        index
            .last()?
            .map(|(height, hash)| Ok(Checkpoint::new(height.value(), decode_hash(hash.value())?)))
            .transpose()
    }
}

impl FastChain for DatabaseChain {
    fn get_work(&self, maximum: Work, above_height: u32, candidate: bool) -> StoreResult<Work> {
        Ok(self.work_above(maximum, above_height, candidate)?)
    }

    fn reorganize(&self, fork_point: &ForkPoint, incoming: &[Header]) -> StoreResult<Vec<Header>> {
        Ok(self.replace_candidate(fork_point, incoming)?)
    }

    fn get_header(&self, height: u32, candidate: bool) -> StoreResult<Option<Header>> {
        Ok(self.header_at(height, candidate)?)
    }

    fn get_height(&self, hash: &BlockHash, candidate: bool) -> StoreResult<Option<u32>> {
        Ok(self.height_of(hash, candidate)?)
    }

    fn top(&self, candidate: bool) -> StoreResult<Option<Checkpoint>> {
        Ok(self.top_of(candidate)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::test_utils::{build_chain, genesis};

    fn open(dir: &TempDir) -> DatabaseChain {
        DatabaseChain::open(dir.path().join("headers.redb"), genesis()).unwrap()
    }

    #[test]
    fn test_new_database_holds_genesis() {
        let temp_dir = TempDir::new().unwrap();
        let chain = open(&temp_dir);
        let genesis = genesis();

        for candidate in [true, false] {
            assert_eq!(
                chain.top(candidate).unwrap(),
                Some(Checkpoint::new(0, genesis.block_hash()))
            );
            assert_eq!(chain.get_header(0, candidate).unwrap(), Some(genesis));
            assert_eq!(chain.get_height(&genesis.block_hash(), candidate).unwrap(), Some(0));
        }
        assert_eq!(chain.path(), temp_dir.path().join("headers.redb"));
    }

    #[test]
    fn test_reorganize_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let headers = build_chain(genesis(), 3, 0);
        {
            let chain = open(&temp_dir);
            let fork_point = Checkpoint::new(0, headers[0].block_hash());
            assert!(chain.reorganize(&fork_point, &headers[1..]).unwrap().is_empty());
        }

        let chain = open(&temp_dir);
        assert_eq!(chain.top(true).unwrap(), Some(Checkpoint::new(3, headers[3].block_hash())));
        assert_eq!(chain.get_header(2, true).unwrap(), Some(headers[2]));
        // Only the candidate chain moved.
        assert_eq!(chain.top(false).unwrap().unwrap().height, 0);
        assert_eq!(chain.get_height(&headers[3].block_hash(), false).unwrap(), None);
    }

    #[test]
    fn test_reorganize_returns_outgoing() {
        let temp_dir = TempDir::new().unwrap();
        let chain = open(&temp_dir);
        let headers = build_chain(genesis(), 3, 0);
        chain
            .reorganize(&Checkpoint::new(0, headers[0].block_hash()), &headers[1..])
            .unwrap();

        let fork = build_chain(headers[1], 1, 7);
        let outgoing = chain
            .reorganize(&Checkpoint::new(1, headers[1].block_hash()), &fork[1..])
            .unwrap();

        assert_eq!(outgoing, headers[2..].to_vec());
        assert_eq!(chain.top(true).unwrap(), Some(Checkpoint::new(2, fork[1].block_hash())));
        assert_eq!(chain.get_height(&headers[3].block_hash(), true).unwrap(), None);
        assert_eq!(chain.get_header(3, true).unwrap(), None);
    }

    #[test]
    fn test_reorganize_rejects_unknown_fork_point() {
        let temp_dir = TempDir::new().unwrap();
        let chain = open(&temp_dir);
        let headers = build_chain(genesis(), 2, 0);

        assert_eq!(
            chain.reorganize(&Checkpoint::new(1, headers[1].block_hash()), &headers[2..]),
            Err(StoreError::ForkPointMismatch)
        );
        assert_eq!(chain.top(true).unwrap().unwrap().height, 0);
    }

    #[test]
    fn test_get_work_above_height() {
        let temp_dir = TempDir::new().unwrap();
        let chain = open(&temp_dir);
        let headers = build_chain(genesis(), 4, 0);
        chain
            .reorganize(&Checkpoint::new(0, headers[0].block_hash()), &headers[1..])
            .unwrap();
        let each = headers[1].work();

        let all = chain.get_work(Work::new(u64::MAX.into()), 2, true).unwrap();
        assert_eq!(all, each.saturating_add(each));
        assert_eq!(chain.get_work(Work::ZERO, 0, true).unwrap(), each);
        assert_eq!(chain.get_work(Work::ZERO, 0, false).unwrap(), Work::ZERO);
    }
}
