//! Message-processing pipeline.
//!
//! One inbound chat event runs through a fixed, linear sequence of guards
//! and fan-outs. Every path ends in a `RunOutcome`; nothing here returns an
//! error, because the webhook acknowledgement must never depend on how a
//! run went.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::chat::{OutboundMessage, ReplyDispatcher};
use crate::credentials::{AccessCredential, CredentialStore};
use crate::extract::{extract_issue_keys, might_mention_issue, IssueKey, ProjectPrefixSet};
use crate::fanout::{settle_all, Settled};
use crate::format::{spam_warning, MessageFormatter};
use crate::tracker::{resolve_all, IssueTracker};

pub const DEFAULT_SPAM_THRESHOLD: usize = 10;

/// Number of `RunOutcome` variants.
pub const OUTCOME_KINDS: usize = 9;

const BOT_MESSAGE_SUBTYPE: &str = "bot_message";

/// Raw event as delivered by the chat platform. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct RawChatEvent {
    text: Option<String>,
    channel: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    subtype: Option<String>,
    user: Option<String>,
    bot_id: Option<String>,
}

/// A validated inbound chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatEvent {
    pub text: String,
    pub channel: String,
    /// Timestamp replies are threaded under: the thread root when the
    /// message is itself a reply, otherwise the message's own `ts`.
    pub thread_ts: String,
    pub subtype: Option<String>,
    pub user: Option<String>,
    pub bot_id: Option<String>,
}

impl ChatEvent {
    /// Validate a raw `event` object. `None` when it is not an object or
    /// lacks the channel or timestamp a reply needs.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let raw: RawChatEvent = serde_json::from_value(value).ok()?;
        let channel = raw.channel.filter(|c| !c.is_empty())?;
        let ts = raw.ts.filter(|t| !t.is_empty());
        let thread_ts = raw.thread_ts.filter(|t| !t.is_empty()).or(ts)?;
        Some(Self {
            text: raw.text.unwrap_or_default(),
            channel,
            thread_ts,
            subtype: raw.subtype,
            user: raw.user.filter(|u| !u.is_empty()),
            bot_id: raw.bot_id.filter(|b| !b.is_empty()),
        })
    }

    /// Messages posted by this or any other bot. Replying to them risks an
    /// endless reply loop.
    pub fn is_machine_generated(&self) -> bool {
        self.subtype.as_deref() == Some(BOT_MESSAGE_SUBTYPE) || self.bot_id.is_some()
    }

    fn reply(&self, text: String) -> OutboundMessage {
        OutboundMessage {
            channel: self.channel.clone(),
            thread_ts: self.thread_ts.clone(),
            text,
        }
    }
}

/// Counts for a run that reached the reply stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplySummary {
    pub keys: Vec<IssueKey>,
    pub resolved: usize,
    pub lookup_failures: usize,
    pub delivered: usize,
    pub reply_failures: usize,
}

/// Terminal state reached by one pipeline run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    NoEvent,
    InvalidEvent,
    MachineGenerated,
    EmptyText,
    NoCredential,
    NoProjects,
    NoMatches,
    SpamGuarded { matches: usize, delivered: bool },
    Replied(ReplySummary),
}

impl RunOutcome {
    pub const LABELS: [&'static str; OUTCOME_KINDS] = [
        "no_event",
        "invalid_event",
        "machine_generated",
        "empty_text",
        "no_credential",
        "no_projects",
        "no_matches",
        "spam_guarded",
        "replied",
    ];

    /// Index into `LABELS`.
    pub fn index(&self) -> usize {
        match self {
            RunOutcome::NoEvent => 0,
            RunOutcome::InvalidEvent => 1,
            RunOutcome::MachineGenerated => 2,
            RunOutcome::EmptyText => 3,
            RunOutcome::NoCredential => 4,
            RunOutcome::NoProjects => 5,
            RunOutcome::NoMatches => 6,
            RunOutcome::SpamGuarded { .. } => 7,
            RunOutcome::Replied(_) => 8,
        }
    }

    pub fn label(&self) -> &'static str {
        Self::LABELS[self.index()]
    }

    /// Number of chat messages successfully posted by the run.
    pub fn messages_delivered(&self) -> usize {
        match self {
            RunOutcome::SpamGuarded { delivered, .. } => usize::from(*delivered),
            RunOutcome::Replied(summary) => summary.delivered,
            _ => 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub spam_threshold: usize,
    /// Reuse a fetched project list for this long. `None` fetches per run.
    pub prefix_cache_ttl: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            spam_threshold: DEFAULT_SPAM_THRESHOLD,
            prefix_cache_ttl: None,
        }
    }
}

struct PrefixCache {
    ttl: Option<Duration>,
    slot: Mutex<Option<(Instant, ProjectPrefixSet)>>,
}

impl PrefixCache {
    fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl: ttl.filter(|d| !d.is_zero()),
            slot: Mutex::new(None),
        }
    }

    fn get(&self) -> Option<ProjectPrefixSet> {
        let ttl = self.ttl?;
        let slot = self.slot.lock().ok()?;
        match slot.as_ref() {
            Some((fetched_at, prefixes)) if fetched_at.elapsed() < ttl => Some(prefixes.clone()),
            _ => None,
        }
    }

    fn store(&self, prefixes: &ProjectPrefixSet) {
        if self.ttl.is_none() || prefixes.is_empty() {
            return;
        }
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((Instant::now(), prefixes.clone()));
        }
    }
}

/// The end-to-end pipeline with its collaborators.
pub struct Pipeline {
    tracker: Arc<dyn IssueTracker>,
    dispatcher: Arc<dyn ReplyDispatcher>,
    credentials: Arc<dyn CredentialStore>,
    formatter: MessageFormatter,
    settings: PipelineSettings,
    prefix_cache: PrefixCache,
}

impl Pipeline {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        dispatcher: Arc<dyn ReplyDispatcher>,
        credentials: Arc<dyn CredentialStore>,
        formatter: MessageFormatter,
        settings: PipelineSettings,
    ) -> Self {
        let prefix_cache = PrefixCache::new(settings.prefix_cache_ttl);
        Self {
            tracker,
            dispatcher,
            credentials,
            formatter,
            settings,
            prefix_cache,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn formatter(&self) -> &MessageFormatter {
        &self.formatter
    }

    /// Process the `event` member of a webhook payload.
    pub async fn run(&self, event: Option<serde_json::Value>) -> RunOutcome {
        let Some(raw) = event else {
            return RunOutcome::NoEvent;
        };
        let Some(event) = ChatEvent::from_value(raw) else {
            tracing::debug!("event lacks channel or timestamp, skipping");
            return RunOutcome::InvalidEvent;
        };
        self.run_event(&event).await
    }

    pub async fn run_event(&self, event: &ChatEvent) -> RunOutcome {
        // Loop guard first: never answer a bot, whatever the text says.
        if event.is_machine_generated() {
            tracing::trace!(channel = %event.channel, "ignoring machine-generated message");
            return RunOutcome::MachineGenerated;
        }
        if event.text.trim().is_empty() {
            return RunOutcome::EmptyText;
        }
        let Some(credential) = self.credential_for(event).await else {
            tracing::debug!(user = ?event.user, "no credential for user, not replying");
            return RunOutcome::NoCredential;
        };
        if !might_mention_issue(&event.text) {
            return RunOutcome::NoMatches;
        }

        let Some(prefixes) = self.project_prefixes().await else {
            return RunOutcome::NoProjects;
        };

        let keys = extract_issue_keys(&event.text, &prefixes);
        if keys.is_empty() {
            return RunOutcome::NoMatches;
        }

        if keys.len() > self.settings.spam_threshold {
            tracing::info!(
                channel = %event.channel,
                matches = keys.len(),
                threshold = self.settings.spam_threshold,
                "too many issue keys, sending spam warning"
            );
            let warning = event.reply(spam_warning(keys.len()));
            let delivered = match self.dispatcher.post(&credential, &warning).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(channel = %event.channel, error = %err, "failed to post spam warning");
                    false
                }
            };
            return RunOutcome::SpamGuarded {
                matches: keys.len(),
                delivered,
            };
        }

        self.reply_with_issues(event, &credential, keys).await
    }

    async fn reply_with_issues(
        &self,
        event: &ChatEvent,
        credential: &AccessCredential,
        keys: Vec<IssueKey>,
    ) -> RunOutcome {
        let lookups = resolve_all(self.tracker.as_ref(), &keys).await;
        let resolutions = Settled::from_outcomes(
            lookups
                .into_iter()
                .map(|(key, issue)| issue.ok_or(key)),
        );

        let messages: Vec<OutboundMessage> = resolutions
            .succeeded
            .iter()
            .map(|issue| event.reply(self.formatter.format(issue)))
            .collect();

        let dispatches = settle_all(messages.iter().map(|message| async move {
            self.dispatcher
                .post(credential, message)
                .await
                .map_err(|err| {
                    tracing::warn!(
                        channel = %message.channel,
                        thread_ts = %message.thread_ts,
                        error = %err,
                        "failed to post issue reply"
                    );
                    err
                })
        }))
        .await;

        let summary = ReplySummary {
            keys,
            resolved: resolutions.succeeded.len(),
            lookup_failures: resolutions.failed.len(),
            delivered: dispatches.succeeded.len(),
            reply_failures: dispatches.failed.len(),
        };
        tracing::debug!(
            channel = %event.channel,
            resolved = summary.resolved,
            lookup_failures = summary.lookup_failures,
            delivered = summary.delivered,
            reply_failures = summary.reply_failures,
            "issue replies settled"
        );
        RunOutcome::Replied(summary)
    }

    async fn credential_for(&self, event: &ChatEvent) -> Option<AccessCredential> {
        let user = event.user.as_deref()?;
        self.credentials.lookup(user).await
    }

    async fn project_prefixes(&self) -> Option<ProjectPrefixSet> {
        if let Some(cached) = self.prefix_cache.get() {
            return Some(cached);
        }
        match self.tracker.project_prefixes().await {
            Ok(prefixes) if !prefixes.is_empty() => {
                self.prefix_cache.store(&prefixes);
                Some(prefixes)
            }
            Ok(_) => {
                tracing::error!("tracker returned no projects; issue lookups are disabled");
                None
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to fetch tracker projects");
                None
            }
        }
    }
}
