use async_trait::async_trait;
use persona_ledger::{AssignmentEmail, LedgerError, LedgerResult, NotificationDispatcher};
use tracing::debug;

/// Posts invitations as JSON to a mail relay. Any non-2xx answer is a failure.
#[derive(Clone)]
pub struct WebhookDispatcher {
    client: reqwest::Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send_assignment_email(&self, email: &AssignmentEmail) -> LedgerResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(email)
            .send()
            .await
            .map_err(|e| LedgerError::Notification(format!("mail relay unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Notification(format!("mail relay answered {status}")));
        }

        debug!(assignment_id = %email.assignment_id, "invitation handed to mail relay");
        Ok(())
    }
}
