use async_trait::async_trait;
use tgen_core::{CollaboratorResult, Notification, NotificationKind, Notifier};

/// Writes notifications to the log instead of a chat or mail channel.
#[derive(Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, n: &Notification) -> CollaboratorResult<()> {
        match n.kind {
            NotificationKind::Failed => {
                tracing::warn!(run_id = %n.run_id, kind = ?n.kind, "{}", n.message)
            }
            _ => tracing::info!(run_id = %n.run_id, kind = ?n.kind, "{}", n.message),
        }
        Ok(())
    }
}
