//! The send loop: one pending user at a time, throttled, every attempt logged.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::model::{SendStatus, UserRow};
use crate::platform::DirectMessenger;
use crate::send_log::{SendLog, SendLogError};
use crate::templates::{render, TemplateBook, TemplateError};
use crate::worklist;

/// Error text recorded when the platform declines a message without a reason.
pub const SEND_FAILED: &str = "Message sending failed";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error(transparent)]
    SendLog(#[from] SendLogError),
}

/// Inclusive range of whole seconds to wait before each send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (lo, hi) = if self.min_secs <= self.max_secs {
            (self.min_secs, self.max_secs)
        } else {
            (self.max_secs, self.min_secs)
        };
        Duration::from_secs(rng.gen_range(lo..=hi))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Live,
    /// Render templates only: no login, no delay, no send, no log row.
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub template: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub username: String,
    pub category: String,
    pub messages: Vec<RenderedMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Sent,
    Failed(String),
    /// Nothing was attempted (no usable template).
    Skipped(String),
    Previewed(Preview),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub previews: Vec<Preview>,
}

impl RunReport {
    fn tally(&mut self, outcome: &UserOutcome) {
        match outcome {
            UserOutcome::Sent => self.sent += 1,
            UserOutcome::Failed(_) => self.failed += 1,
            UserOutcome::Skipped(_) => self.skipped += 1,
            UserOutcome::Previewed(p) => self.previews.push(p.clone()),
        }
    }
}

pub struct DmSender {
    client: Arc<dyn DirectMessenger>,
    templates: TemplateBook,
    send_log: SendLog,
    delay: DelayRange,
    template_name: Option<String>,
    worklist: Option<PathBuf>,
    rng: StdRng,
}

impl DmSender {
    pub fn new(
        client: Arc<dyn DirectMessenger>,
        templates: TemplateBook,
        send_log: SendLog,
        delay: DelayRange,
    ) -> Self {
        Self {
            client,
            templates,
            send_log,
            delay,
            template_name: None,
            worklist: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Always use this template instead of a random one.
    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    /// Mark users `sent` / `failed` in this worklist after each attempt.
    pub fn with_status_updates(mut self, worklist: impl Into<PathBuf>) -> Self {
        self.worklist = Some(worklist.into());
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub async fn run(&mut self, users: &[UserRow], mode: SendMode) -> Result<RunReport, SendError> {
        self.run_with(users, mode, |_, _, _| {}).await
    }

    /// Process `users` in order, calling `on_user(index, user, outcome)` after each.
    ///
    /// In live mode a refused login aborts the run before any user is touched.
    /// Per-user failures never abort it.
    #[instrument(skip_all, fields(users = users.len(), mode = ?mode))]
    pub async fn run_with<F>(
        &mut self,
        users: &[UserRow],
        mode: SendMode,
        mut on_user: F,
    ) -> Result<RunReport, SendError>
    where
        F: FnMut(usize, &UserRow, &UserOutcome),
    {
        if mode == SendMode::Live {
            match self.client.login().await {
                Ok(true) => info!("logged in"),
                Ok(false) => {
                    return Err(SendError::Authentication("platform refused login".into()))
                }
                Err(err) => return Err(SendError::Authentication(format!("{:#}", err))),
            }
            self.send_log.ensure()?;
        }

        let mut report = RunReport::default();
        for (idx, user) in users.iter().enumerate() {
            let outcome = match mode {
                SendMode::Live => self.send_one(user).await,
                SendMode::DryRun => match self.preview(user) {
                    Ok(p) => UserOutcome::Previewed(p),
                    Err(err) => {
                        error!(%err, username = %user.username, category = %user.category, "cannot preview user");
                        UserOutcome::Skipped(err.to_string())
                    }
                },
            };
            report.tally(&outcome);
            on_user(idx, user, &outcome);
        }

        info!(
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            previewed = report.previews.len(),
            "run finished"
        );
        Ok(report)
    }

    /// Template, delay, send, log, status update for one user.
    pub async fn send_one(&mut self, user: &UserRow) -> UserOutcome {
        let username = user.username.as_str();
        let category = user.category.as_str();

        let text = match self
            .templates
            .choose(category, self.template_name.as_deref(), &mut self.rng)
        {
            Ok((name, template)) => {
                info!(username, category, template = name, "selected template");
                render(template, user)
            }
            Err(err) => {
                error!(%err, username, category, "no template for user");
                return UserOutcome::Skipped(err.to_string());
            }
        };

        let delay = self.delay.sample(&mut self.rng);
        if !delay.is_zero() {
            info!(username, delay_secs = delay.as_secs(), "waiting before send");
            tokio::time::sleep(delay).await;
        }

        let (status, failure) = match self.client.send_direct_message(username, &text).await {
            Ok(true) => (SendStatus::Success, None),
            Ok(false) => {
                warn!(username, category, "message not sent");
                (SendStatus::Failed, Some(SEND_FAILED.to_string()))
            }
            Err(err) => {
                error!(?err, username, category, "unexpected error sending message");
                (SendStatus::Failed, Some(format!("{:#}", err)))
            }
        };

        // A user only leaves `pending` once the attempt is in the log.
        let logged = match self
            .send_log
            .record(username, category, status, failure.clone())
        {
            Ok(_) => true,
            Err(err) => {
                error!(%err, username, category, "failed to append send log; worklist status left unchanged");
                false
            }
        };

        if let (true, Some(path)) = (logged, &self.worklist) {
            if let Err(err) = worklist::update_row_status(path, user, status.user_status()) {
                warn!(%err, username, category, "failed to update worklist status");
            }
        }

        match failure {
            None => UserOutcome::Sent,
            Some(reason) => UserOutcome::Failed(reason),
        }
    }

    /// Render what would be sent: the fixed template if one is set, otherwise
    /// every template of the user's category.
    pub fn preview(&mut self, user: &UserRow) -> Result<Preview, TemplateError> {
        let chosen = match self.template_name.as_deref() {
            Some(name) => vec![self.templates.choose(&user.category, Some(name), &mut self.rng)?],
            None => self.templates.templates_for(&user.category),
        };
        if chosen.is_empty() {
            return Err(TemplateError::NoTemplates(user.category.clone()));
        }
        Ok(Preview {
            username: user.username.clone(),
            category: user.category.clone(),
            messages: chosen
                .into_iter()
                .map(|(name, template)| RenderedMessage {
                    template: name.to_string(),
                    text: render(template, user),
                })
                .collect(),
        })
    }
}
