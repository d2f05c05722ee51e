//! Database gateway with message-scoped sessions.
//!
//! Every query gets its own session. The session lives inside the
//! [`QueryStream`] and is released exactly once: as soon as the stream
//! reports its terminal event, or when the stream is dropped early.

use crate::backend::{GraphBackend, RecordStream};
use crate::GatewayError;
use futures_util::stream::{FusedStream, Stream, StreamExt};
use sg_core::{QueryRequest, Record};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tracing::{debug, info};

/// Process-wide handle to the graph database.
pub struct DatabaseGateway {
    backend: Arc<dyn GraphBackend>,
    active: Arc<AtomicUsize>,
    next_session: AtomicU64,
}

impl DatabaseGateway {
    /// Creates a gateway over a backend.
    pub fn new<B: GraphBackend + 'static>(backend: B) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Creates a gateway over a backend that is also held elsewhere.
    pub fn from_shared(backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            backend,
            active: Arc::new(AtomicUsize::new(0)),
            next_session: AtomicU64::new(1),
        }
    }

    /// Checks that the database answers a trivial query.
    pub async fn probe(&self) -> Result<(), GatewayError> {
        self.backend.probe().await
    }

    /// Opens a session and starts the request's query in it.
    pub fn run_query(&self, request: &QueryRequest) -> QueryStream {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let session = Session::open(id, Arc::clone(&self.active));
        let records = self.backend.execute(&request.message, &request.params);

        QueryStream {
            session_id: id,
            open: Some(OpenQuery {
                records,
                _session: session,
            }),
        }
    }

    /// Closes the shared connection pool.
    pub async fn close(&self) {
        info!("Closing database gateway");
        self.backend.close().await;
    }

    /// Number of sessions that have not been released yet.
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// A database session scoped to exactly one query.
#[derive(Debug)]
struct Session {
    id: u64,
    active: Arc<AtomicUsize>,
}

impl Session {
    fn open(id: u64, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        debug!(session = id, "Session opened");
        Self { id, active }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(session = self.id, "Session closed");
    }
}

struct OpenQuery {
    records: RecordStream,
    // Dropped together with `records`.
    _session: Session,
}

/// Records of one query, followed by completion (end of stream) or a
/// single error.
pub struct QueryStream {
    session_id: u64,
    open: Option<OpenQuery>,
}

impl QueryStream {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Whether the session is still held.
    pub fn holds_session(&self) -> bool {
        self.open.is_some()
    }
}

impl Stream for QueryStream {
    type Item = Result<Record, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(open) = self.open.as_mut() else {
            return Poll::Ready(None);
        };

        let item = ready!(open.records.poll_next_unpin(cx));
        if !matches!(item, Some(Ok(_))) {
            // Terminal event: drop the driver stream and release the session.
            self.open = None;
        }
        Poll::Ready(item)
    }
}

impl FusedStream for QueryStream {
    fn is_terminated(&self) -> bool {
        self.open.is_none()
    }
}
