use tokio::sync::mpsc;

use crate::notify::{Notice, Notifier};

/// Application events
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// Message for the user
  Notice(Notice),
  /// Download progress of one item
  Progress { item: String, value: f64 },
}

/// Event channel between background work and the front end
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Get a sender for producers
  pub fn sender(&self) -> EventSender {
    EventSender {
      tx: self.tx.clone(),
    }
  }

  /// Receive an event if one is queued
  pub fn try_next(&mut self) -> Option<Event> {
    self.rx.try_recv().ok()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone)]
pub struct EventSender {
  tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
  /// Send an event, ignoring a closed channel
  pub fn send(&self, event: Event) {
    let _ = self.tx.send(event);
  }
}

impl Notifier for EventSender {
  fn notify(&self, notice: Notice) {
    self.send(Event::Notice(notice));
  }
}
