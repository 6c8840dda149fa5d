//! Email dispatch: persist first, then deliver on a bounded worker pool.
//!
//! The caller gets the outbox id back as soon as the row exists and the job
//! is queued. Workers drive each email to a terminal status, writing the
//! status after every attempt so pollers see `retrying` during backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use pressdesk_core::config::MailConfig;
use pressdesk_core::error::{PressdeskError, Result, TransportError};
use pressdesk_core::traits::{MailTransport, TemplateRenderer};
use pressdesk_core::types::{EmailStatus, OutgoingEmail, TemplateParams};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::store::{OutboundEmail, OutboxStore};

/// Body stored when the template could not be rendered.
pub const RENDER_FAILURE_BODY: &str = "failed to render";

/// Delivery settings, passed in explicitly.
#[derive(Debug, Clone)]
pub struct MailSettings {
    /// When false, emails are recorded as `pending` and never attempted.
    pub enabled: bool,
    pub from: String,
    pub reply_to: Option<String>,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub workers: usize,
    pub queue_capacity: usize,
}

impl MailSettings {
    pub fn from_config(config: &MailConfig) -> Self {
        Self {
            enabled: config.enabled,
            from: config.from_address.clone(),
            reply_to: config.reply_to.clone(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            workers: config.workers,
            queue_capacity: config.queue_capacity,
        }
    }
}

impl MailSettings {
    /// How long an in-flight record may sit untouched before a manual
    /// re-send may take it over: one full retry schedule.
    pub fn stale_after(&self) -> Duration {
        self.retry_delay * self.max_attempts.max(1)
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self::from_config(&MailConfig::default())
    }
}

/// A templated send request.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub subject: String,
    pub recipients: Vec<String>,
    pub template: String,
    pub params: TemplateParams,
}

/// State shared by the dispatcher and its workers.
struct Delivery {
    store: Arc<OutboxStore>,
    transport: Arc<dyn MailTransport>,
    settings: MailSettings,
}

impl Delivery {
    fn build_email(&self, record: &OutboundEmail) -> std::result::Result<OutgoingEmail, TransportError> {
        let bcc = record
            .recipient_list()
            .map_err(|e| TransportError::Permanent(format!("Unreadable recipients: {e}")))?;
        if bcc.is_empty() {
            return Err(TransportError::Permanent("No recipients".into()));
        }
        Ok(OutgoingEmail {
            from: self.settings.from.clone(),
            reply_to: self.settings.reply_to.clone(),
            bcc,
            subject: record.subject.clone(),
            text_body: record.subject.clone(),
            html_body: record.body.clone(),
        })
    }

    /// Attempt delivery until sent, permanently rejected, or out of attempts.
    async fn deliver_with_retry(&self, id: i64) -> Result<EmailStatus> {
        let record = self.store.get(id)?;
        if record.status.is_terminal() {
            tracing::debug!("email #{id} already {}, skipping", record.status);
            return Ok(record.status);
        }
        let email = match self.build_email(&record) {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!("⚠️ Email #{id} cannot be sent: {e}");
                self.store.record_attempt(id, EmailStatus::Failed, 0, Some(&e.to_string()))?;
                return Ok(EmailStatus::Failed);
            }
        };

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempts = 0u32;
        loop {
            let result = self.transport.send(&email).await;
            attempts += 1;
            match result {
                Ok(()) => {
                    self.store.record_attempt(id, EmailStatus::Sent, attempts, None)?;
                    tracing::info!("✅ Email #{id} sent via {} (attempt {attempts})", self.transport.name());
                    return Ok(EmailStatus::Sent);
                }
                Err(e) => {
                    let give_up = e.is_permanent() || attempts >= max_attempts;
                    let status = if give_up { EmailStatus::Failed } else { EmailStatus::Retrying };
                    self.store.record_attempt(id, status, attempts, Some(&e.to_string()))?;
                    if give_up {
                        tracing::warn!("❌ Email #{id} failed after {attempts} attempt(s): {e}");
                        return Ok(EmailStatus::Failed);
                    }
                    tracing::warn!(
                        "⚠️ Email #{id} attempt {attempts}/{max_attempts} failed: {e}; retrying in {:?}",
                        self.settings.retry_delay
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
            }
        }
    }
}

/// Email dispatcher backed by a fixed pool of delivery workers.
pub struct Dispatcher {
    delivery: Arc<Delivery>,
    renderer: Arc<dyn TemplateRenderer>,
    queue: mpsc::Sender<i64>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the worker pool. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<OutboxStore>,
        transport: Arc<dyn MailTransport>,
        renderer: Arc<dyn TemplateRenderer>,
        settings: MailSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let worker_count = settings.workers.max(1);
        let delivery = Arc::new(Delivery {
            store,
            transport,
            settings,
        });

        let workers = (0..worker_count)
            .map(|n| tokio::spawn(run_worker(n, delivery.clone(), rx.clone())))
            .collect();

        tracing::info!("📬 Mail dispatcher started ({worker_count} workers)");
        Self {
            delivery,
            renderer,
            queue: tx,
            workers,
        }
    }

    pub fn store(&self) -> &Arc<OutboxStore> {
        &self.delivery.store
    }

    /// Render a template and dispatch the result.
    ///
    /// A rendering failure is recorded as a `failed` email carrying
    /// [`RENDER_FAILURE_BODY`]; nothing is sent.
    pub async fn dispatch(&self, request: SendRequest) -> Result<i64> {
        match self.renderer.render(&request.template, &request.params) {
            Ok(body) => {
                self.dispatch_rendered(&request.subject, &request.recipients, &body)
                    .await
            }
            Err(e) => {
                let id = self.delivery.store.create_failed(
                    &request.subject,
                    &request.recipients,
                    RENDER_FAILURE_BODY,
                    &e.to_string(),
                )?;
                tracing::warn!("❌ Email #{id} not sent, template '{}': {e}", request.template);
                Ok(id)
            }
        }
    }

    /// Persist an already rendered email and queue it for delivery.
    /// Waits for queue space when all workers are busy.
    pub async fn dispatch_rendered(
        &self,
        subject: &str,
        recipients: &[String],
        body: &str,
    ) -> Result<i64> {
        let enabled = self.delivery.settings.enabled;
        let status = if enabled { EmailStatus::Sending } else { EmailStatus::Pending };
        let id = self.delivery.store.create(subject, recipients, body, status)?;

        if !enabled {
            tracing::info!("📭 Mail disabled, email #{id} left pending for manual send");
            return Ok(id);
        }

        self.queue
            .send(id)
            .await
            .map_err(|_| PressdeskError::Mail("Dispatcher workers have stopped".into()))?;
        tracing::info!("📨 Email #{id} queued: '{subject}' ({} recipients)", recipients.len());
        Ok(id)
    }

    /// Send a stored email again: one attempt, no retry.
    ///
    /// Reuses the stored body and recipients. Ignores the global enabled flag,
    /// since this is the manual send path. Refuses emails already sent, and
    /// emails a worker is still driving. An in-flight email untouched for
    /// longer than [`MailSettings::stale_after`] is treated as abandoned.
    pub async fn resend(&self, id: i64) -> Result<EmailStatus> {
        let delivery = &self.delivery;
        let record = delivery.store.get(id)?;
        match record.status {
            EmailStatus::Sent => {
                return Err(PressdeskError::Conflict(format!("email #{id} was already sent")));
            }
            status if status.is_in_flight() => {
                let idle = (Utc::now() - record.updated_at).to_std().unwrap_or_default();
                if idle < delivery.settings.stale_after() {
                    return Err(PressdeskError::Conflict(format!(
                        "email #{id} is still {status}"
                    )));
                }
                tracing::warn!("♻️ Email #{id} stuck in {status} for {idle:?}, taking it over");
            }
            _ => {}
        }

        let outcome = match delivery.build_email(&record) {
            Ok(email) => delivery.transport.send(&email).await,
            Err(e) => Err(e),
        };
        let status = match outcome {
            Ok(()) => {
                delivery.store.record_resend(&record, EmailStatus::Sent, None)?;
                tracing::info!("✅ Email #{id} re-sent");
                EmailStatus::Sent
            }
            Err(e) => {
                delivery
                    .store
                    .record_resend(&record, EmailStatus::Failed, Some(&e.to_string()))?;
                tracing::warn!("❌ Email #{id} re-send failed: {e}");
                EmailStatus::Failed
            }
        };
        Ok(status)
    }

    /// Stop accepting work and wait for queued and in-flight emails to finish.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!("Mail worker ended abnormally: {e}");
            }
        }
        tracing::info!("📪 Mail dispatcher stopped");
    }
}

async fn run_worker(n: usize, delivery: Arc<Delivery>, queue: Arc<Mutex<mpsc::Receiver<i64>>>) {
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(id) = next else { break };
        tracing::debug!("worker {n} picked email #{id}");
        if let Err(e) = delivery.deliver_with_retry(id).await {
            tracing::error!("Email #{id} delivery aborted: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::InlineTemplates;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with the given error, then succeeds.
    /// Records the persisted status of the newest email at each call.
    struct ScriptedTransport {
        failures: u32,
        error: TransportError,
        calls: AtomicU32,
        store: Arc<OutboxStore>,
        seen: StdMutex<Vec<EmailStatus>>,
    }

    impl ScriptedTransport {
        fn new(store: Arc<OutboxStore>, failures: u32, error: TransportError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                store,
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<EmailStatus> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _email: &OutgoingEmail) -> std::result::Result<(), TransportError> {
            let newest = self.store.list_recent(1).unwrap();
            self.seen.lock().unwrap().push(newest[0].status);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn transient() -> TransportError {
        TransportError::Transient("connection refused".into())
    }

    fn settings(enabled: bool) -> MailSettings {
        MailSettings {
            enabled,
            from: "desk@example.com".into(),
            reply_to: Some("editors@example.com".into()),
            max_attempts: 3,
            retry_delay: Duration::from_millis(5),
            workers: 2,
            queue_capacity: 8,
        }
    }

    fn setup(enabled: bool, failures: u32, error: TransportError) -> (Dispatcher, Arc<ScriptedTransport>) {
        setup_with(settings(enabled), failures, error)
    }

    fn setup_with(
        settings: MailSettings,
        failures: u32,
        error: TransportError,
    ) -> (Dispatcher, Arc<ScriptedTransport>) {
        let store = Arc::new(OutboxStore::open_in_memory().unwrap());
        let transport = Arc::new(ScriptedTransport::new(store.clone(), failures, error));
        let templates = InlineTemplates::new().with("notice.html", "<p>{{ text }}</p>");
        let dispatcher = Dispatcher::start(
            store,
            transport.clone(),
            Arc::new(templates),
            settings,
        );
        (dispatcher, transport)
    }

    fn request(template: &str) -> SendRequest {
        SendRequest {
            subject: "Notice".into(),
            recipients: vec!["a@x.com".into(), "b@y.org".into()],
            template: template.into(),
            params: [("text".to_string(), "hello".to_string())].into_iter().collect(),
        }
    }

    #[tokio::test]
    async fn test_disabled_leaves_pending() {
        let (dispatcher, transport) = setup(false, 0, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(store.get(id).unwrap().status, EmailStatus::Pending);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let (dispatcher, transport) = setup(true, 0, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        dispatcher.shutdown().await;

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.attempts, 1);
        assert_eq!(email.body, "<p>hello</p>");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_always_failing_gives_up_after_three() {
        let (dispatcher, transport) = setup(true, u32::MAX, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        dispatcher.shutdown().await;

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.attempts, 3);
        assert_eq!(email.last_error.as_deref(), Some("transient: connection refused"));
        assert_eq!(transport.calls(), 3);
        assert_eq!(
            transport.seen(),
            vec![EmailStatus::Sending, EmailStatus::Retrying, EmailStatus::Retrying]
        );
    }

    #[tokio::test]
    async fn test_fails_twice_then_sends() {
        let (dispatcher, transport) = setup(true, 2, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        dispatcher.shutdown().await;

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.attempts, 3);
        assert_eq!(email.last_error, None);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_skips_retries() {
        let permanent = TransportError::Permanent("550 mailbox unavailable".into());
        let (dispatcher, transport) = setup(true, u32::MAX, permanent);
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        dispatcher.shutdown().await;

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.attempts, 1);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_render_failure_short_circuits() {
        let (dispatcher, transport) = setup(true, 0, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("missing.html")).await.unwrap();
        dispatcher.shutdown().await;

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.body, RENDER_FAILURE_BODY);
        assert_eq!(email.attempts, 0);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_recipients_fail_without_attempt() {
        let (dispatcher, transport) = setup(true, 0, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch_rendered("Notice", &[], "<p>x</p>").await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(store.get(id).unwrap().status, EmailStatus::Failed);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_resend_single_attempt_on_failure() {
        let (dispatcher, transport) = setup(true, u32::MAX, transient());
        let store = dispatcher.store().clone();
        let id = store
            .create("Notice", &["a@x.com".into()], "X", EmailStatus::Failed)
            .unwrap();

        let status = dispatcher.resend(id).await.unwrap();
        assert_eq!(status, EmailStatus::Failed);
        assert_eq!(transport.calls(), 1);

        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Failed);
        assert_eq!(email.body, "X");
        assert_eq!(email.attempts, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_resend_pending_ignores_disabled_flag() {
        let (dispatcher, transport) = setup(false, 0, transient());
        let store = dispatcher.store().clone();
        let id = dispatcher.dispatch(request("notice.html")).await.unwrap();
        assert_eq!(store.get(id).unwrap().status, EmailStatus::Pending);

        assert_eq!(dispatcher.resend(id).await.unwrap(), EmailStatus::Sent);
        assert_eq!(transport.calls(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_resend_refuses_in_flight() {
        let slow = MailSettings {
            retry_delay: Duration::from_secs(60),
            ..settings(true)
        };
        let (dispatcher, transport) = setup_with(slow, 0, transient());
        let store = dispatcher.store().clone();
        let id = store
            .create("Notice", &["a@x.com".into()], "X", EmailStatus::Retrying)
            .unwrap();

        assert!(matches!(dispatcher.resend(id).await, Err(PressdeskError::Conflict(_))));
        assert_eq!(transport.calls(), 0);
        assert_eq!(store.get(id).unwrap().status, EmailStatus::Retrying);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_resend_takes_over_stale_retrying() {
        let slow = MailSettings {
            retry_delay: Duration::from_secs(60),
            ..settings(true)
        };
        let (dispatcher, transport) = setup_with(slow, 0, transient());
        let store = dispatcher.store().clone();
        let id = store
            .create("Notice", &["a@x.com".into()], "X", EmailStatus::Retrying)
            .unwrap();
        store.backdate(id, chrono::Duration::minutes(10));

        assert_eq!(dispatcher.resend(id).await.unwrap(), EmailStatus::Sent);
        assert_eq!(transport.calls(), 1);
        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.attempts, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_resend_refuses_sent() {
        let (dispatcher, transport) = setup(true, u32::MAX, transient());
        let store = dispatcher.store().clone();
        let id = store
            .create("Notice", &["a@x.com".into()], "X", EmailStatus::Sending)
            .unwrap();
        store.record_attempt(id, EmailStatus::Sent, 1, None).unwrap();

        assert!(matches!(dispatcher.resend(id).await, Err(PressdeskError::Conflict(_))));
        assert_eq!(transport.calls(), 0);
        let email = store.get(id).unwrap();
        assert_eq!(email.status, EmailStatus::Sent);
        assert_eq!(email.attempts, 1);
        dispatcher.shutdown().await;
    }

    #[test]
    fn test_stale_after_covers_retry_schedule() {
        let s = MailSettings {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
            ..MailSettings::default()
        };
        assert_eq!(s.stale_after(), Duration::from_secs(180));
    }
}
