//! Deferred resolution of symbolic references.
//!
//! Import runs in two phases. While features are persisted, every entity
//! carrying an object id records a *target* entry (`object id -> row id`),
//! and every symbolic reference records a *reference* entry
//! (`owning row id -> target object id`) while its foreign key stays `NULL`.
//! Once all batches have been committed the [`ReferenceManager`] sweeps the
//! reference entries of each [`CacheKind`] exactly once and rewrites the
//! foreign keys it can resolve.
#![forbid(unsafe_code)]

use std::collections::HashMap;

use camino::Utf8Path;
use rusqlite::{Connection, Error as SqliteError, TransactionBehavior};
use strata_core::{CacheKind, RowId};
use thiserror::Error;

use crate::store::{DiskMap, DiskStore, StoreError, decode, encode};

/// Reference entries fetched from the store per page during resolution.
pub const RESOLVE_PAGE_SIZE: usize = 1_000;

/// Errors raised while caching or resolving references.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The disk-backed cache store failed.
    #[error("reference cache store failed")]
    Store(#[from] StoreError),
    /// Beginning or finishing the resolution transaction failed.
    #[error("failed to {operation} while resolving references")]
    Transaction {
        operation: &'static str,
        #[source]
        source: SqliteError,
    },
    /// Writing a resolved foreign key failed.
    #[error("failed to resolve {kind} reference from row {owner}")]
    Update {
        kind: CacheKind,
        owner: RowId,
        #[source]
        source: SqliteError,
    },
    /// A cached owner key is not a row id.
    #[error("reference cache for {kind} holds malformed owner key {key:?}")]
    MalformedKey { kind: CacheKind, key: String },
    /// Targets were missing under fail-fast; nothing was updated.
    #[error("{count} reference(s) could not be resolved; first: {first}")]
    Dangling {
        count: usize,
        first: DanglingReference,
    },
}

/// A reference whose target object id was never imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingReference {
    pub kind: CacheKind,
    /// Row that owns the unresolved foreign key.
    pub owner: RowId,
    pub target: String,
}

impl std::fmt::Display for DanglingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:?} referenced from row {}",
            self.kind, self.target, self.owner
        )
    }
}

/// Outcome of the resolution sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    /// Foreign keys rewritten.
    pub resolved: u64,
    /// References left `NULL`.
    pub dangling: Vec<DanglingReference>,
}

fn target_map_name(kind: CacheKind) -> String {
    format!("target_{}", kind.as_str())
}

fn reference_map_name(kind: CacheKind) -> String {
    format!("ref_{}", kind.as_str())
}

const fn update_sql(kind: CacheKind) -> &'static str {
    match kind {
        CacheKind::Feature => "UPDATE property SET val_feature_id = ?1 WHERE id = ?2",
        CacheKind::Address => "UPDATE property SET val_address_id = ?1 WHERE id = ?2",
        CacheKind::ImplicitGeometry => "UPDATE property SET val_implicitgeom_id = ?1 WHERE id = ?2",
        CacheKind::SurfaceData => "UPDATE appear_to_surface_data SET surface_data_id = ?1 WHERE id = ?2",
        CacheKind::TextureImage => "UPDATE surface_data SET tex_image_id = ?1 WHERE id = ?2",
    }
}

#[derive(Debug, Clone)]
struct KindMaps {
    targets: DiskMap,
    references: DiskMap,
}

/// Owns the session's disk-backed store and performs the final sweep.
#[derive(Debug)]
pub struct ReferenceManager {
    store: DiskStore,
    maps: HashMap<CacheKind, KindMaps>,
}

impl ReferenceManager {
    /// Create the backing store in `temp_dir` (the OS temp dir when `None`).
    pub fn create(temp_dir: Option<&Utf8Path>) -> Result<Self, ReferenceError> {
        let store = DiskStore::create(temp_dir)?;
        let mut maps = HashMap::new();
        for kind in CacheKind::ALL {
            maps.insert(
                kind,
                KindMaps {
                    targets: store.get_or_create_map(&target_map_name(kind))?,
                    references: store.get_or_create_map(&reference_map_name(kind))?,
                },
            );
        }
        Ok(Self { store, maps })
    }

    /// A writer for one worker. Writers share the underlying store.
    pub fn cache(&self) -> ReferenceCache {
        ReferenceCache {
            maps: self.maps.clone(),
            pending_targets: Vec::new(),
            pending_references: Vec::new(),
        }
    }

    /// Resolve every cached reference, then release the store.
    ///
    /// All updates run in one immediate transaction on `connection`. Missing
    /// targets are reported in the returned [`ResolutionReport`]; with
    /// `fail_fast` they abort the sweep and nothing is updated.
    pub fn resolve(
        self,
        connection: &mut Connection,
        fail_fast: bool,
    ) -> Result<ResolutionReport, ReferenceError> {
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| ReferenceError::Transaction {
                operation: "begin resolution transaction",
                source,
            })?;

        let mut report = ResolutionReport::default();
        for kind in CacheKind::ALL {
            let Some(maps) = self.maps.get(&kind) else {
                continue;
            };
            let resolved = resolve_kind(&transaction, kind, maps, &mut report.dangling)?;
            if resolved > 0 {
                log::debug!("resolved {resolved} {kind} reference(s)");
            }
            report.resolved += resolved;
        }

        if fail_fast && let Some(first) = report.dangling.first() {
            return Err(ReferenceError::Dangling {
                count: report.dangling.len(),
                first: first.clone(),
            });
        }

        transaction
            .commit()
            .map_err(|source| ReferenceError::Transaction {
                operation: "commit resolution transaction",
                source,
            })?;
        self.store.close()?;
        Ok(report)
    }

    /// Drop every cached entry without resolving anything.
    pub fn discard(self) -> Result<(), ReferenceError> {
        self.store.close().map_err(ReferenceError::from)
    }
}

fn resolve_kind(
    transaction: &rusqlite::Transaction<'_>,
    kind: CacheKind,
    maps: &KindMaps,
    dangling: &mut Vec<DanglingReference>,
) -> Result<u64, ReferenceError> {
    let mut statement = transaction
        .prepare_cached(update_sql(kind))
        .map_err(|source| ReferenceError::Transaction {
            operation: "prepare resolution statement",
            source,
        })?;
    let mut resolved = 0;
    let mut after: Option<String> = None;
    loop {
        let page = maps.references.scan(after.as_deref(), RESOLVE_PAGE_SIZE)?;
        let Some((last, _)) = page.last() else {
            break;
        };
        after = Some(last.clone());

        for (key, value) in page {
            let owner: RowId = key
                .parse()
                .map_err(|_| ReferenceError::MalformedKey { kind, key: key.clone() })?;
            let target: String = decode(&value)?;
            match maps.targets.get(&target)? {
                Some(bytes) => {
                    let id: RowId = decode(&bytes)?;
                    statement
                        .execute((id, owner))
                        .map_err(|source| ReferenceError::Update { kind, owner, source })?;
                    resolved += 1;
                }
                None => {
                    log::warn!("dangling {kind} reference to {target:?} from row {owner}");
                    dangling.push(DanglingReference { kind, owner, target });
                }
            }
        }
    }
    Ok(resolved)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetEntry {
    kind: CacheKind,
    object_id: String,
    id: RowId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReferenceEntry {
    kind: CacheKind,
    owner: RowId,
    target: String,
}

/// Per-worker writer that buffers cache entries until their batch executes.
#[derive(Debug)]
pub struct ReferenceCache {
    maps: HashMap<CacheKind, KindMaps>,
    pending_targets: Vec<TargetEntry>,
    pending_references: Vec<ReferenceEntry>,
}

impl ReferenceCache {
    /// Remember that `object_id` of `kind` was persisted as row `id`.
    pub fn record_target(&mut self, kind: CacheKind, object_id: &str, id: RowId) {
        self.pending_targets.push(TargetEntry {
            kind,
            object_id: object_id.to_owned(),
            id,
        });
    }

    /// Remember that row `owner` points at `target` through a `NULL` key.
    pub fn record_reference(&mut self, kind: CacheKind, owner: RowId, target: &str) {
        self.pending_references.push(ReferenceEntry {
            kind,
            owner,
            target: target.to_owned(),
        });
    }

    /// Whether a target entry for `object_id` is already persisted.
    pub fn has_target(&self, kind: CacheKind, object_id: &str) -> Result<bool, ReferenceError> {
        match self.maps.get(&kind) {
            Some(maps) => Ok(maps.targets.contains_key(object_id)?),
            None => Ok(false),
        }
    }

    /// Persist a target entry immediately; `true` when this call won the key.
    ///
    /// Used to deduplicate shared entities such as texture images across
    /// workers before their rows are staged.
    pub fn claim_target(
        &self,
        kind: CacheKind,
        object_id: &str,
        id: RowId,
    ) -> Result<bool, ReferenceError> {
        let Some(maps) = self.maps.get(&kind) else {
            return Ok(false);
        };
        Ok(maps.targets.put_if_absent(object_id, &encode(&id)?)?.is_none())
    }

    /// Entries waiting for the next batch.
    pub fn pending(&self) -> usize {
        self.pending_targets.len() + self.pending_references.len()
    }

    /// Write buffered entries to the store. Target entries keep the first writer.
    pub fn persist(&mut self) -> Result<usize, ReferenceError> {
        let written = self.pending();
        for entry in self.pending_targets.drain(..) {
            if let Some(maps) = self.maps.get(&entry.kind) {
                maps.targets
                    .put_if_absent(&entry.object_id, &encode(&entry.id)?)?;
            }
        }
        for entry in self.pending_references.drain(..) {
            if let Some(maps) = self.maps.get(&entry.kind) {
                maps.references
                    .put_if_absent(&entry.owner.to_string(), &encode(&entry.target)?)?;
            }
        }
        Ok(written)
    }

    /// Forget buffered entries.
    pub fn discard_pending(&mut self) {
        self.pending_targets.clear();
        self.pending_references.clear();
    }
}
