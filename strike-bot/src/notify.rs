//! Log-backed notification sink.
//!
//! Delivery transports (chat, email) live outside this workspace; the
//! operator-visible surface here is the structured log stream, with
//! severity mapped from the event class.

use strike_core::{NotificationEvent, Notifier};
use tracing::{error, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: NotificationEvent) {
        match &event {
            NotificationEvent::AuthExpired
            | NotificationEvent::CredentialExpired
            | NotificationEvent::Fatal { .. } => error!(alert = %event, "operator alert"),
            NotificationEvent::FeedDown { .. }
            | NotificationEvent::FeedDisconnected { .. }
            | NotificationEvent::CredentialExpiring { .. } => warn!(alert = %event, "operator alert"),
            _ => info!(alert = %event, "operator alert"),
        }
    }
}
