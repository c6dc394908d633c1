//! The owner side of a negotiation.
//!
//! Each inbound request runs as its own task:
//!
//! 1. register a negotiation and reply with an Ack carrying the current value
//!    and a fresh commit mailbox;
//! 2. wait for a Commit or for the proposer to disconnect;
//! 3. on `Commit`, merge the proposal unless a local write invalidated the
//!    negotiation since step 1, and report the outcome;
//! 4. deregister, whichever way step 2 ended.
//!
//! Invalidation is per-document: any write through [`ChangeHandler::update`],
//! including one made by another accepted commit, invalidates every
//! negotiation that is outstanding at that moment.

use crate::drain::{DrainLock, Drainer};
use crate::error::TeardownViolation;
use crate::view::MetadataView;
use metachange_core::{
    AckMsg, Address, CommitMsg, MailboxId, Metadata, RequestMsg, ResultMsg,
};
use metachange_transport::{Mailbox, MailboxManager, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Serves negotiation requests for one metadata view.
///
/// Must be shut down with [`ChangeHandler::shutdown`]; dropping a handler
/// while negotiations are in flight panics.
pub struct ChangeHandler<T: Metadata> {
    inner: Arc<HandlerInner<T>>,
    request_address: Address<RequestMsg<T>>,
    drainer: Drainer,
    request_loop: JoinHandle<()>,
}

struct HandlerInner<T> {
    manager: MailboxManager,
    view: Arc<dyn MetadataView<T>>,
    negotiations: Mutex<Negotiations>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct NegotiationId(u64);

impl fmt::Display for NegotiationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Outstanding negotiations and whether each has been invalidated.
#[derive(Default)]
struct Negotiations {
    next_id: u64,
    invalidated: HashMap<NegotiationId, bool>,
}

impl Negotiations {
    fn invalidate_all(&mut self) {
        for flag in self.invalidated.values_mut() {
            *flag = true;
        }
    }
}

impl<T: Metadata> ChangeHandler<T> {
    /// Serve requests on the node's well-known change request mailbox.
    pub fn new(
        manager: MailboxManager,
        view: Arc<dyn MetadataView<T>>,
    ) -> Result<Self, TransportError> {
        let requests = manager.well_known_mailbox(MailboxId::CHANGE_REQUESTS)?;
        Ok(Self::serve(manager, view, requests))
    }

    /// Serve requests on a freshly allocated mailbox.
    pub fn with_mailbox(manager: MailboxManager, view: Arc<dyn MetadataView<T>>) -> Self {
        let requests = manager.mailbox();
        Self::serve(manager, view, requests)
    }

    fn serve(
        manager: MailboxManager,
        view: Arc<dyn MetadataView<T>>,
        requests: Mailbox<RequestMsg<T>>,
    ) -> Self {
        let request_address = requests.address();
        let inner = Arc::new(HandlerInner {
            manager,
            view,
            negotiations: Mutex::new(Negotiations::default()),
        });
        let drainer = Drainer::new();
        let request_loop = tokio::spawn(serve_requests(inner.clone(), requests, drainer.clone()));
        tracing::debug!("Change handler listening on {}", request_address);

        Self {
            inner,
            request_address,
            drainer,
            request_loop,
        }
    }

    /// Where peers send requests to open a negotiation.
    pub fn request_address(&self) -> Address<RequestMsg<T>> {
        self.request_address.clone()
    }

    /// The current local value.
    pub fn get(&self) -> T {
        self.inner.view.get()
    }

    /// Merge `value` into the local view.
    ///
    /// Every outstanding negotiation is invalidated, whether or not the merge
    /// changes anything.
    pub fn update(&self, value: &T) {
        self.inner.update(value);
    }

    /// Negotiations registered and not yet concluded.
    pub fn active_negotiations(&self) -> usize {
        self.inner.negotiations.lock().invalidated.len()
    }

    /// Stop accepting requests and wait for every running negotiation to
    /// conclude, by commit, abandonment or disconnect.
    pub async fn shutdown(mut self) {
        self.request_loop.abort();
        let _ = (&mut self.request_loop).await;
        self.drainer.drain().await;
        tracing::debug!("Change handler on {} drained", self.request_address);
    }
}

impl<T: Metadata> Drop for ChangeHandler<T> {
    fn drop(&mut self) {
        self.request_loop.abort();
        // A spawned negotiation holds its drain lock before it registers.
        let active = self
            .active_negotiations()
            .max(self.drainer.outstanding());
        if active != 0 && !std::thread::panicking() {
            panic!("{}", TeardownViolation { active });
        }
    }
}

impl<T: Metadata> HandlerInner<T> {
    fn update(&self, value: &T) {
        let mut negotiations = self.negotiations.lock();
        negotiations.invalidate_all();
        self.view.merge_in(value);
    }

    /// Register a negotiation and take its baseline in one step, so no write
    /// can land between the two unnoticed.
    fn start(self: &Arc<Self>) -> (Registration<T>, T) {
        let mut negotiations = self.negotiations.lock();
        let id = NegotiationId(negotiations.next_id);
        negotiations.next_id += 1;
        negotiations.invalidated.insert(id, false);
        let baseline = self.view.get();
        let registration = Registration {
            inner: self.clone(),
            id,
        };
        (registration, baseline)
    }

    /// Merge `proposed` if negotiation `id` is still valid. Concludes `id`
    /// either way.
    fn try_commit(&self, id: NegotiationId, proposed: &T) -> bool {
        let mut negotiations = self.negotiations.lock();
        let valid = negotiations.invalidated.remove(&id) == Some(false);
        if valid {
            negotiations.invalidate_all();
            self.view.merge_in(proposed);
        }
        valid
    }
}

/// Membership of one negotiation in the handler's active set. Removed on
/// drop, so every exit path of the negotiation task deregisters.
struct Registration<T: Metadata> {
    inner: Arc<HandlerInner<T>>,
    id: NegotiationId,
}

impl<T: Metadata> Drop for Registration<T> {
    fn drop(&mut self) {
        self.inner.negotiations.lock().invalidated.remove(&self.id);
    }
}

async fn serve_requests<T: Metadata>(
    inner: Arc<HandlerInner<T>>,
    mut requests: Mailbox<RequestMsg<T>>,
    drainer: Drainer,
) {
    while let Some(request) = requests.recv().await {
        let Some(lock) = drainer.lock() else {
            tracing::debug!("Handler draining; ignoring request from {}", request.ack_address.peer());
            continue;
        };
        tokio::spawn(negotiate(inner.clone(), request.ack_address, lock));
    }
}

async fn negotiate<T: Metadata>(
    inner: Arc<HandlerInner<T>>,
    ack_address: Address<AckMsg<T>>,
    _lock: DrainLock,
) {
    let proposer = ack_address.peer().clone();
    let mut commits = inner.manager.mailbox::<CommitMsg<T>>();
    let mut proposer_lost = inner.manager.watch_disconnect(&proposer);
    let (registration, baseline) = inner.start();
    let id = registration.id;

    inner.manager.send(
        &ack_address,
        &AckMsg {
            metadata: baseline,
            commit_address: commits.address(),
        },
    );
    tracing::debug!("Negotiation {} with {} started", id, proposer);

    let commit = tokio::select! {
        biased;
        commit = commits.recv() => commit,
        () = proposer_lost.wait() => None,
    };

    match commit {
        Some(CommitMsg::Commit {
            metadata,
            result_address,
        }) => {
            let success = inner.try_commit(id, &metadata);
            if success {
                tracing::info!("Applied change from {} (negotiation {})", proposer, id);
            } else {
                tracing::debug!("Rejected stale change from {} (negotiation {})", proposer, id);
            }
            inner.manager.send(&result_address, &ResultMsg { success });
        }
        Some(CommitMsg::Abandon) => {
            tracing::debug!("Negotiation {} abandoned by {}", id, proposer);
        }
        None => {
            tracing::debug!("Negotiation {} ended: {} lost", id, proposer);
        }
    }
    drop(registration);
}
