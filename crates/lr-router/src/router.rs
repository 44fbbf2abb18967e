//! The routing state machine.
//!
//! `AwaitingHeader -> Sniffing -> Routed`, or `AwaitingHeader -> Routed` when
//! the header rule decides. One lock guards every transition together with
//! the buffer flush, so the timer and a size-triggering write cannot both
//! fire.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::RouterConfig;
use crate::destination::Destination;
use crate::rules::{HeaderRule, ResponseHead, SniffRule};

/// Per-response router deciding where the body goes.
///
/// Cheap to clone; clones share one decision. The router never closes or
/// finalizes the chosen destination.
pub struct ResponseRouter<D> {
    shared: Arc<Shared<D>>,
}

/// Receives the routing decision once it is made.
pub struct RoutingDecision<D> {
    receiver: oneshot::Receiver<D>,
}

struct Shared<D> {
    config: RouterConfig,
    header_rule: Box<dyn HeaderRule<D>>,
    sniff_rule: Box<dyn SniffRule<D>>,
    state: Mutex<State<D>>,
}

struct State<D> {
    head: ResponseHead,
    phase: Phase<D>,
    notify: Option<oneshot::Sender<D>>,
}

enum Phase<D> {
    AwaitingHeader,
    Sniffing {
        buffer: BytesMut,
        timer: Option<AbortHandle>,
    },
    Routed(D),
}

/// What made sniff routing fire.
#[derive(Clone, Copy, Debug)]
enum Trigger {
    Size,
    Timeout,
    Flush,
}

impl<D: Destination> ResponseRouter<D> {
    /// Create a router with the given rules.
    ///
    /// Returns the router and the receiver of its single routing decision.
    pub fn new<H, S>(config: RouterConfig, header_rule: H, sniff_rule: S) -> (Self, RoutingDecision<D>)
    where
        H: HeaderRule<D> + 'static,
        S: SniffRule<D> + 'static,
    {
        let (notify, receiver) = oneshot::channel();
        let shared = Arc::new(Shared {
            config,
            header_rule: Box::new(header_rule),
            sniff_rule: Box::new(sniff_rule),
            state: Mutex::new(State {
                head: ResponseHead::default(),
                phase: Phase::AwaitingHeader,
                notify: Some(notify),
            }),
        });
        (Self { shared }, RoutingDecision { receiver })
    }

    /// Write the response head.
    ///
    /// Only the first call has an effect. Runs the header rule; if it
    /// abstains, sniffing starts and, when a sniff duration is configured and
    /// a Tokio runtime is available, the sniff timer is started.
    pub fn write_header(&self, status: StatusCode, headers: HeaderMap) {
        let mut state = self.shared.lock();
        self.shared.begin(&mut state, ResponseHead { status, headers });
    }

    /// Write body bytes.
    ///
    /// Writes before any header imply a `200 OK` head with no headers.
    /// Returns an error only when the chosen destination fails.
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.shared.lock();
        if matches!(state.phase, Phase::AwaitingHeader) {
            self.shared.begin(&mut state, ResponseHead::default());
        }

        let sniff_size = self.shared.config.sniff_size;
        let size_reached = match &mut state.phase {
            Phase::Routed(destination) => {
                destination.write(data)?;
                false
            }
            Phase::Sniffing { buffer, .. } => {
                buffer.extend_from_slice(data);
                sniff_size > 0 && buffer.len() >= sniff_size
            }
            // begin() above never leaves the router in this phase
            Phase::AwaitingHeader => false,
        };

        if size_reached {
            self.shared.route_sniffed(&mut state, Trigger::Size)?;
        }
        Ok(data.len())
    }

    /// Force a pending sniff decision with whatever has been buffered.
    ///
    /// No-op when the router is already routed or no header was written yet.
    pub fn flush(&self) -> io::Result<()> {
        let mut state = self.shared.lock();
        self.shared.route_sniffed(&mut state, Trigger::Flush)
    }

    /// Response status; `200 OK` until a header is written.
    pub fn status(&self) -> StatusCode {
        self.shared.lock().head.status
    }

    /// Response head as written.
    pub fn head(&self) -> ResponseHead {
        self.shared.lock().head.clone()
    }

    /// Whether the destination has been chosen.
    pub fn is_routed(&self) -> bool {
        matches!(self.shared.lock().phase, Phase::Routed(_))
    }

    /// The chosen destination, if any.
    pub fn destination(&self) -> Option<D> {
        match &self.shared.lock().phase {
            Phase::Routed(destination) => Some(destination.clone()),
            _ => None,
        }
    }

    /// Bytes currently held in the sniff buffer.
    pub fn buffered(&self) -> usize {
        match &self.shared.lock().phase {
            Phase::Sniffing { buffer, .. } => buffer.len(),
            _ => 0,
        }
    }
}

impl<D> Clone for ResponseRouter<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Destination> Shared<D> {
    fn lock(&self) -> MutexGuard<'_, State<D>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave `AwaitingHeader` through the header rule.
    fn begin(self: &Arc<Self>, state: &mut State<D>, head: ResponseHead) {
        if !matches!(state.phase, Phase::AwaitingHeader) {
            return;
        }

        let routed = self.header_rule.route(&head);
        state.head = head;

        if let Some(destination) = routed {
            tracing::trace!(status = %state.head.status, "Response routed by header");
            Self::settle(state, destination);
            return;
        }

        let timer = if self.config.sniff_duration > Duration::ZERO {
            self.start_timer()
        } else {
            None
        };
        state.phase = Phase::Sniffing {
            buffer: BytesMut::new(),
            timer,
        };
    }

    /// Route by sniffing if still sniffing; otherwise do nothing.
    fn route_sniffed(&self, state: &mut State<D>, trigger: Trigger) -> io::Result<()> {
        let Phase::Sniffing { buffer, timer } = &mut state.phase else {
            return Ok(());
        };

        if let Some(timer) = timer.take()
            && !matches!(trigger, Trigger::Timeout)
        {
            timer.abort();
        }
        let sniffed = std::mem::take(buffer);

        let destination = self.sniff_rule.route(&state.head, &sniffed);
        tracing::debug!(
            ?trigger,
            sniffed = sniffed.len(),
            status = %state.head.status,
            "Response routed by content sniffing"
        );

        let flushed = destination.write(&sniffed);
        Self::settle(state, destination);
        flushed
    }

    /// Fix the destination and publish the decision.
    fn settle(state: &mut State<D>, destination: D) {
        if let Some(notify) = state.notify.take() {
            let _ = notify.send(destination.clone());
        }
        state.phase = Phase::Routed(destination);
    }

    fn start_timer(self: &Arc<Self>) -> Option<AbortHandle> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, sniff timer disabled");
            return None;
        };

        let shared: Weak<Self> = Arc::downgrade(self);
        let delay = self.config.sniff_duration;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut state = shared.lock();
            if let Err(err) = shared.route_sniffed(&mut state, Trigger::Timeout) {
                tracing::debug!(error = %err, "Flushing sniffed bytes failed");
            }
        });
        Some(task.abort_handle())
    }
}

impl<D> RoutingDecision<D> {
    /// Wait for the decision.
    ///
    /// Returns `None` when every router handle was dropped undecided, which
    /// callers treat as "nothing to rewrite".
    pub async fn routed(self) -> Option<D> {
        self.receiver.await.ok()
    }

    /// Take the decision if it has been made.
    pub fn try_routed(&mut self) -> Option<D> {
        self.receiver.try_recv().ok()
    }
}
