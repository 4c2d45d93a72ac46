//! The event channel between the native engine and the host.
//!
//! Every native callback becomes exactly one [`Event`], enqueued in arrival
//! order and consumed one at a time. The channel is the single
//! serialization point of the bridge: the consumption path is the only
//! place call state is mutated, so the host can process events without any
//! locking of its own.
//!
//! Producer side ([`EventQueue::push`], reached through
//! [`CallbackSink`](crate::engine::CallbackSink)) is called from engine
//! threads and never blocks. If the consumer falls behind, the queue drops
//! the oldest queued registration event first; call-lifecycle events are
//! never dropped, the queue grows past its soft capacity instead. A call
//! must always be able to reach its closed event.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::Stream;
use tracing::{debug, warn};

use crate::call::Call;
use crate::core::{CallId, CloseReason, DtmfDigit, Event};
use crate::engine::NativeCallback;
use crate::registry::CallRegistry;

// One pending item: either a raw engine callback, or a closure the bridge
// synthesized itself (a dial the engine refused before a session existed).
#[derive(Debug, Clone)]
pub(crate) enum QueueItem {
    Callback(NativeCallback),
    DialFailed { call_id: CallId, reason: CloseReason },
}

impl QueueItem {
    // Only registration updates may be shed under overflow.
    fn is_droppable(&self) -> bool {
        matches!(
            self,
            QueueItem::Callback(NativeCallback::RegistrationChanged { .. })
        )
    }
}

struct QueueInner {
    items: VecDeque<QueueItem>,
    closed: bool,
    waker: Option<Waker>,
    dropped_registrations: u64,
}

// Many-producer/one-consumer FIFO. A plain VecDeque under a mutex so the
// overflow policy can inspect and remove queued items.
pub(crate) struct EventQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        Arc::new(EventQueue {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
                waker: None,
                dropped_registrations: 0,
            }),
            capacity: capacity.max(1),
        })
    }

    /// Enqueue an item. Never blocks; called from engine threads.
    pub(crate) fn push(&self, item: QueueItem) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            debug!(?item, "event after channel close, dropping");
            return;
        }

        if inner.items.len() >= self.capacity {
            if let Some(pos) = inner.items.iter().position(QueueItem::is_droppable) {
                inner.items.remove(pos);
                inner.dropped_registrations += 1;
                warn!(
                    dropped = inner.dropped_registrations,
                    "event queue full, shed oldest registration event"
                );
            } else if item.is_droppable() {
                inner.dropped_registrations += 1;
                warn!(
                    dropped = inner.dropped_registrations,
                    "event queue full of call events, shed incoming registration event"
                );
                return;
            }
            // A call-lifecycle item with nothing to shed goes in regardless.
        }

        inner.items.push_back(item);
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Close the channel. Already-queued items remain consumable; after
    /// they drain the consumer sees the end of the stream.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        let waker = inner.waker.take();
        drop(inner);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    #[cfg(test)]
    pub(crate) fn dropped_registrations(&self) -> u64 {
        self.inner.lock().unwrap().dropped_registrations
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Option<QueueItem>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.items.pop_front() {
            return Poll::Ready(Some(item));
        }
        if inner.closed {
            return Poll::Ready(None);
        }
        inner.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// The host's view of the event channel: a lazy, ordered, single-consumer
/// sequence of [`Event`]s.
///
/// `next_event` blocks (asynchronously) until an event arrives, and yields
/// `None` forever once the engine has stopped and the queue drained. The
/// stream is obtained once per bridge and cannot be restarted.
///
/// Translation happens here, on the consumption path: sessions are
/// resolved against the registry and state transitions applied before the
/// event is handed out, one event at a time.
///
/// # Panics
///
/// An unrecognized callback (unknown session, impossible state
/// transition, invalid inbound DTMF digit) is an engine contract
/// violation and panics rather than guessing.
pub struct EventStream {
    queue: Arc<EventQueue>,
    registry: Arc<CallRegistry>,
}

impl EventStream {
    pub(crate) fn new(queue: Arc<EventQueue>, registry: Arc<CallRegistry>) -> Self {
        EventStream { queue, registry }
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        futures::StreamExt::next(self).await
    }

    fn translate(&self, item: QueueItem) -> Event {
        match item {
            QueueItem::Callback(NativeCallback::IncomingCall { session, peer }) => {
                let call = self
                    .registry
                    .resolve_or_create(session, crate::core::CallDirection::Inbound, &peer);
                Event::IncomingCall { call_id: call.id(), peer }
            }
            QueueItem::Callback(NativeCallback::CallStateChanged { session, progress }) => {
                let call = self.expect_call(session, "state change");
                let state = call.apply_progress(progress);
                Event::CallProgress { call_id: call.id(), state }
            }
            QueueItem::Callback(NativeCallback::MediaEstablished { session }) => {
                let call = self.expect_call(session, "media");
                call.apply_media_established();
                Event::MediaEstablished { call_id: call.id() }
            }
            QueueItem::Callback(NativeCallback::DtmfReceived { session, digit }) => {
                let call = self.expect_call(session, "DTMF");
                let digit = match DtmfDigit::new(digit) {
                    Ok(digit) => digit,
                    Err(_) => panic!("engine delivered invalid DTMF digit {:?} on {}", digit, session),
                };
                Event::DtmfReceived { call_id: call.id(), digit }
            }
            QueueItem::Callback(NativeCallback::CallClosed { session, code, text }) => {
                let call = self.expect_call(session, "close");
                call.apply_closed();
                self.registry.remove(call.id());
                Event::CallClosed {
                    call_id: call.id(),
                    reason: CloseReason::new(code, text),
                }
            }
            QueueItem::Callback(NativeCallback::RegistrationChanged { state, detail }) => {
                Event::RegistrationChanged { state, detail }
            }
            QueueItem::DialFailed { call_id, reason } => {
                let call = self
                    .registry
                    .lookup(call_id)
                    .unwrap_or_else(|_| panic!("dial failure for unknown {}", call_id));
                call.apply_closed();
                self.registry.remove(call_id);
                Event::CallClosed { call_id, reason }
            }
        }
    }

    fn expect_call(&self, session: crate::engine::SessionHandle, kind: &str) -> Arc<Call> {
        self.registry
            .by_session(session)
            .unwrap_or_else(|| panic!("engine reported {} for unknown {}", kind, session))
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        match this.queue.poll_pop(cx) {
            Poll::Ready(Some(item)) => Poll::Ready(Some(this.translate(item))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
