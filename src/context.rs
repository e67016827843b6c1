//! Ingestion context shared between the ingestion flow and its readers
//!
//! An [`IngestionSession`] holds at most one [`IngestionContext`]: the
//! current target, the uploaded bundle and the ingested scene. Readers take
//! `Arc` snapshots and never observe a half-built scene. Each ingestion
//! starts by taking an [`IngestionTicket`]; starting another ingestion makes
//! every older ticket stale, and committing with a stale ticket discards the
//! result instead of applying it.

use crate::bundle::AssetBundle;
use crate::pipeline::IngestedScene;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// What an ingested model is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IngestionTarget {
    /// A placed order
    #[serde(rename_all = "camelCase")]
    Order {
        /// Order identifier
        order_id: String,
    },
    /// A catalog product variant
    #[serde(rename_all = "camelCase")]
    ProductVariant {
        /// Product identifier
        product_id: String,
        /// Variant identifier
        variant_id: String,
    },
    /// A customer's custom print request
    #[serde(rename_all = "camelCase")]
    CustomPrintRequest {
        /// Request identifier
        request_id: String,
    },
}

impl fmt::Display for IngestionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionTarget::Order { order_id } => write!(f, "order {}", order_id),
            IngestionTarget::ProductVariant {
                product_id,
                variant_id,
            } => write!(f, "product {} variant {}", product_id, variant_id),
            IngestionTarget::CustomPrintRequest { request_id } => {
                write!(f, "custom print request {}", request_id)
            }
        }
    }
}

/// Everything known about the current ingestion
#[derive(Debug, Clone)]
pub struct IngestionContext {
    /// What the model belongs to
    pub target: IngestionTarget,
    /// The bundle as uploaded
    pub bundle: AssetBundle,
    /// The decoded, normalized model
    pub ingested: IngestedScene,
    /// Generation of the ticket that committed this context
    pub generation: u64,
}

/// Proof that an ingestion was started, used to commit its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionTicket {
    generation: u64,
    target: IngestionTarget,
}

impl IngestionTicket {
    /// Generation number, increasing per session
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Target the ingestion was started for
    pub fn target(&self) -> &IngestionTarget {
        &self.target
    }
}

/// Result of [`IngestionSession::commit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The context was replaced
    Committed,
    /// A newer ingestion was started; the result was discarded
    Stale,
}

/// Single slot holding the current [`IngestionContext`]
///
/// `Send + Sync`, so ingestion may run on a worker thread while readers
/// take snapshots.
#[derive(Debug, Default)]
pub struct IngestionSession {
    generation: AtomicU64,
    current: RwLock<Option<Arc<IngestionContext>>>,
}

impl IngestionSession {
    /// Empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an ingestion, superseding any in flight
    ///
    /// Selecting a different target discards the current context, so a
    /// failed ingestion never leaves another target's scene visible. A
    /// retry for the same target keeps it until the new result commits.
    pub fn begin(&self, target: IngestionTarget) -> IngestionTicket {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if slot.as_ref().is_some_and(|context| context.target != target) {
            debug!(generation, target = %target, "Target changed, discarding context");
            *slot = None;
        }
        debug!(generation, target = %target, "Ingestion started");
        IngestionTicket { generation, target }
    }

    /// Whether `ticket` belongs to the most recent [`begin`](Self::begin)
    pub fn is_current(&self, ticket: &IngestionTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }

    /// Replace the context with a finished ingestion, unless superseded
    ///
    /// Failed ingestions are simply never committed, which leaves the
    /// previous context of the same target in place.
    ///
    /// # Example
    ///
    /// ```
    /// use print_ingest::{AssetBundle, CommitOutcome, IngestionSession, IngestionTarget, Pipeline};
    ///
    /// let stl = "solid t\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nvertex 0 1 0\nendloop\nendfacet\nendsolid t\n";
    /// let bundle = AssetBundle::single("part.stl", stl.as_bytes().to_vec());
    /// let session = IngestionSession::new();
    ///
    /// let ticket = session.begin(IngestionTarget::Order { order_id: "A-1".into() });
    /// let ingested = Pipeline::new().ingest(&bundle).unwrap();
    ///
    /// assert_eq!(session.commit(&ticket, bundle, ingested), CommitOutcome::Committed);
    /// assert_eq!(session.snapshot().unwrap().ingested.file_name, "part.stl");
    /// ```
    pub fn commit(
        &self,
        ticket: &IngestionTicket,
        bundle: AssetBundle,
        ingested: IngestedScene,
    ) -> CommitOutcome {
        let context = Arc::new(IngestionContext {
            target: ticket.target.clone(),
            bundle,
            ingested,
            generation: ticket.generation,
        });

        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // Checked under the write lock so a newer commit cannot be overwritten
        if !self.is_current(ticket) {
            debug!(generation = ticket.generation, "Discarding stale ingestion result");
            return CommitOutcome::Stale;
        }
        info!(
            generation = ticket.generation,
            target = %ticket.target,
            primary = context.ingested.primary_path.as_str(),
            "Committed ingestion"
        );
        *slot = Some(context);
        CommitOutcome::Committed
    }

    /// The current context, if any ingestion has been committed
    pub fn snapshot(&self) -> Option<Arc<IngestionContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the current context
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
