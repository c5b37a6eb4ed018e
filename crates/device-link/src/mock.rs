use crate::{DeviceLink, LinkError, ParamValue, Result, Timestamp, Uid, UpdateSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A request as seen by the mock link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkRequest {
    Subscribe { uid: Uid, delay_ms: u16 },
    Write { uid: Uid, index: usize, value: ParamValue },
    Read { uid: Uid, index: usize },
}

/// An in-process link that records requests instead of talking to hardware.
///
/// [`MockLink::acknowledge`] plays the part of the devices: it answers every pending
/// subscription with an ack and every write with an update carrying the written value.
#[derive(Default)]
pub struct MockLink {
    pending: Mutex<Vec<LinkRequest>>,
    sent: Mutex<Vec<LinkRequest>>,
    closed: AtomicBool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further request fail with [`LinkError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Every request accepted since the last [`MockLink::clear_sent`], in order.
    /// The history is unbounded until cleared.
    pub fn sent(&self) -> Vec<LinkRequest> {
        self.sent.lock().clone()
    }

    /// Forget the request history. Pending requests are kept.
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deliver responses for all pending requests into `sink`, stamped `ts`.
    /// Returns how many responses changed state.
    pub fn acknowledge(&self, sink: &dyn UpdateSink, ts: Timestamp) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut applied = 0;
        for req in pending {
            let changed = match req {
                LinkRequest::Subscribe { uid, delay_ms } => {
                    sink.on_subscription_ack(uid, delay_ms, ts)
                }
                LinkRequest::Write { uid, index, value } => {
                    sink.on_param_update(uid, index, value, ts)
                }
                // No device model to read from
                LinkRequest::Read { .. } => false,
            };
            if changed {
                applied += 1;
            }
        }
        tracing::debug!(applied, "mock link acknowledged pending requests");
        applied
    }

    fn push(&self, req: LinkRequest) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Closed);
        }
        tracing::trace!(?req, "mock link request");
        self.sent.lock().push(req.clone());
        self.pending.lock().push(req);
        Ok(())
    }
}

impl DeviceLink for MockLink {
    fn request_subscription(&self, uid: Uid, delay_ms: u16) -> Result<()> {
        self.push(LinkRequest::Subscribe { uid, delay_ms })
    }

    fn request_write(&self, uid: Uid, index: usize, value: &ParamValue) -> Result<()> {
        self.push(LinkRequest::Write {
            uid,
            index,
            value: value.clone(),
        })
    }

    fn request_read(&self, uid: Uid, index: usize) -> Result<()> {
        self.push(LinkRequest::Read { uid, index })
    }
}
