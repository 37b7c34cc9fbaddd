//! Notification requests and the outbox that queues them.

pub mod model;
pub mod outbox;

pub use model::{DispatchReceipt, Notification, NotificationKind, Recipient, ScheduledNotification};
pub use outbox::OutboxNotifier;
