use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    reason::Reason,
    timer::{TimerGuard, TimerQueue},
    types::{ChannelKey, ReplyId},
};

use super::TimerTarget;

/// Receives the reply to a request, or the reason none will arrive
pub trait ReplyHandler {
    fn handle_message(&mut self, source: &SocketAddr, data: &[u8]);
    fn handle_exception(&mut self, reason: Reason);
}

struct OutstandingRequest {
    handler: Box<dyn ReplyHandler>,
    channel: Option<ChannelKey>,
    addr: SocketAddr,
    _timer: Option<TimerGuard>,
}

/// Routes replies to the handlers of outstanding requests
pub struct RequestManager {
    requests: HashMap<ReplyId, OutstandingRequest>,
    next_reply_id: ReplyId,
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            requests: HashMap::new(),
            next_reply_id: 1,
        }
    }

    fn allocate_reply_id(&mut self) -> ReplyId {
        loop {
            let reply_id = self.next_reply_id;
            self.next_reply_id = self.next_reply_id.wrapping_add(1);
            if reply_id != 0 && !self.requests.contains_key(&reply_id) {
                return reply_id;
            }
        }
    }

    /// Registers a request sent to `addr`, optionally on a channel, and
    /// returns the reply id to write into it
    pub fn add(
        &mut self,
        handler: Box<dyn ReplyHandler>,
        channel: Option<ChannelKey>,
        addr: SocketAddr,
        timeout: Option<Duration>,
        timers: &mut TimerQueue<TimerTarget>,
        now: Instant,
    ) -> ReplyId {
        let reply_id = self.allocate_reply_id();
        let timer = timeout
            .map(|timeout| {
                timers.add_once_off_timer(now + timeout, TimerTarget::RequestTimeout(reply_id))
            });
        self.requests.insert(
            reply_id,
            OutstandingRequest {
                handler,
                channel,
                addr,
                _timer: timer,
            },
        );
        reply_id
    }

    /// Delivers a reply. Returns false if no request is waiting on the id.
    pub fn handle_reply(&mut self, reply_id: ReplyId, source: &SocketAddr, data: &[u8]) -> bool {
        let Some(mut request) = self.requests.remove(&reply_id) else {
            debug!("Reply {} from {} matches no outstanding request", reply_id, source);
            return false;
        };
        if request.addr != *source {
            debug!(
                "Reply {} came from {} but the request went to {}",
                reply_id, source, request.addr
            );
        }
        request.handler.handle_message(source, data);
        true
    }

    pub fn handle_timeout(&mut self, reply_id: ReplyId) {
        if let Some(mut request) = self.requests.remove(&reply_id) {
            warn!("Request {} to {} timed out", reply_id, request.addr);
            request.handler.handle_exception(Reason::TimerExpired);
        }
    }

    /// Fails every request waiting on a channel
    pub fn cancel_requests_for(&mut self, channel: ChannelKey, reason: Reason) {
        let cancelled: Vec<ReplyId> = self
            .requests
            .iter()
            .filter(|(_, request)| request.channel == Some(channel))
            .map(|(reply_id, _)| *reply_id)
            .collect();
        for reply_id in cancelled {
            if let Some(mut request) = self.requests.remove(&reply_id) {
                request.handler.handle_exception(reason);
            }
        }
    }

    pub fn cancel_all(&mut self, reason: Reason) {
        for (_, mut request) in self.requests.drain() {
            request.handler.handle_exception(reason);
        }
    }

    pub fn num_outstanding(&self) -> usize {
        self.requests.len()
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}
