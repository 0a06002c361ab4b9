//! Block-based primary key allocation.
//!
//! Each worker reserves a contiguous range of ids per table with a single
//! upsert against `strata_sequence` and hands them out locally until the
//! range is exhausted. Reservations run in autocommit mode, outside any batch
//! transaction, so a rolled-back batch never returns its ids: aborted work
//! leaves gaps rather than duplicates.
#![forbid(unsafe_code)]

use std::collections::HashMap;

use rusqlite::{Connection, Error as SqliteError};
use strata_core::RowId;
use thiserror::Error;

use crate::schema::Table;

/// Default number of ids reserved per round trip.
pub const DEFAULT_BLOCK_SIZE: u32 = 100;

const RESERVE_SQL: &str = "INSERT INTO strata_sequence (name, next_value) VALUES (?1, 1 + ?2)
    ON CONFLICT(name) DO UPDATE SET next_value = next_value + ?2
    RETURNING next_value - ?2";

/// Errors raised while reserving ids.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The sequence upsert failed.
    #[error("failed to reserve {block_size} ids for table {table}")]
    Reserve {
        table: Table,
        block_size: u32,
        #[source]
        source: SqliteError,
    },
}

#[derive(Debug, Clone, Copy)]
struct Block {
    next: RowId,
    end: RowId,
}

/// Per-worker id allocator. Blocks are never shared between workers.
#[derive(Debug)]
pub struct SequenceAllocator {
    block_size: u32,
    blocks: HashMap<Table, Block>,
}

impl SequenceAllocator {
    /// Create an allocator reserving `block_size` ids at a time (at least one).
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size: block_size.max(1),
            blocks: HashMap::new(),
        }
    }

    /// Return the next id for `table`, reserving a fresh block when needed.
    pub fn next_id(&mut self, connection: &Connection, table: Table) -> Result<RowId, SequenceError> {
        if let Some(block) = self.blocks.get_mut(&table) {
            if block.next < block.end {
                let id = block.next;
                block.next += 1;
                return Ok(id);
            }
        }
        let start = reserve(connection, table, self.block_size)?;
        log::trace!(
            "reserved ids {start}..{} for {table}",
            start + RowId::from(self.block_size)
        );
        self.blocks.insert(
            table,
            Block {
                next: start + 1,
                end: start + RowId::from(self.block_size),
            },
        );
        Ok(start)
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}

fn reserve(connection: &Connection, table: Table, block_size: u32) -> Result<RowId, SequenceError> {
    connection
        .prepare_cached(RESERVE_SQL)
        .and_then(|mut statement| {
            statement.query_row((table.name(), i64::from(block_size)), |row| row.get(0))
        })
        .map_err(|source| SequenceError::Reserve {
            table,
            block_size,
            source,
        })
}
