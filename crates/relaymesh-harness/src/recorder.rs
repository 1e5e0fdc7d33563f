//! Application receiver that records everything it is told.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use relaymesh_client::Receiver;
use relaymesh_core::View;
use relaymesh_proto::Address;

#[derive(Default)]
struct Log {
    views: Vec<View>,
    messages: Vec<(Address, Bytes)>,
}

/// Records installed views and application messages. Clones share the log,
/// so keep one clone for assertions and hand the other to the channel.
#[derive(Clone, Default)]
pub struct Recorder {
    log: Arc<Mutex<Log>>,
}

impl Recorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every view installed so far, in order.
    pub fn views(&self) -> Vec<View> {
        self.lock().views.clone()
    }

    /// Installed views with exactly `size` members.
    pub fn views_of_size(&self, size: usize) -> Vec<View> {
        self.lock().views.iter().filter(|v| v.size() == size).cloned().collect()
    }

    /// Application messages received so far.
    pub fn messages(&self) -> Vec<(Address, Bytes)> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Receiver for Recorder {
    fn on_view_change(&mut self, view: &View) {
        self.lock().views.push(view.clone());
    }

    fn on_message(&mut self, sender: &Address, payload: &Bytes) {
        self.lock().messages.push((sender.clone(), payload.clone()));
    }
}

#[cfg(test)]
mod tests {
    use relaymesh_core::ViewId;

    use super::*;

    #[test]
    fn clones_share_the_log() {
        let recorder = Recorder::new();
        let mut handed_out = recorder.clone();

        let a = Address::new("A", 1);
        handed_out.on_view_change(&View::singleton(a.clone(), 1));
        handed_out.on_view_change(&View::new(ViewId::new(a.clone(), 2), vec![
            a.clone(),
            Address::new("B", 1),
        ]));
        handed_out.on_message(&a, &Bytes::from_static(b"hi"));

        assert_eq!(recorder.views().len(), 2);
        assert_eq!(recorder.views_of_size(2).len(), 1);
        assert_eq!(recorder.messages(), vec![(a, Bytes::from_static(b"hi"))]);
    }
}
