use std::{cell::RefCell, net::SocketAddr, rc::Rc};

use wicket_transport::{Reason, ReplyHandler};

/// Records the outcome of requests so a test can inspect it after the
/// handler has been handed to the interface
#[derive(Clone, Default)]
pub struct RecordingHandler {
    outcomes: Rc<RefCell<Vec<Result<Vec<u8>, Reason>>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<Result<Vec<u8>, Reason>> {
        self.outcomes.borrow().clone()
    }

    pub fn replies(&self) -> Vec<Vec<u8>> {
        self.outcomes
            .borrow()
            .iter()
            .filter_map(|outcome| outcome.as_ref().ok().cloned())
            .collect()
    }
}

impl ReplyHandler for RecordingHandler {
    fn handle_message(&mut self, _source: &SocketAddr, data: &[u8]) {
        self.outcomes.borrow_mut().push(Ok(data.to_vec()));
    }

    fn handle_exception(&mut self, reason: Reason) {
        self.outcomes.borrow_mut().push(Err(reason));
    }
}
