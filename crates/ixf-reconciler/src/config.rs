//! Run configuration, loaded from the environment with sane defaults so a
//! bare dry run needs nothing set.

use serde::Deserialize;

/// Reconciler-wide settings. Field names mirror their environment variable
/// names (lower-cased), since that is the only mapping `config::Environment`
/// needs to do.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// `IXF_SEND_TICKETS` - use the real ticket client instead of the mock.
    pub ixf_send_tickets: bool,
    /// `IXF_TICKET_ON_CONFLICT` - open a ticket immediately on an apply conflict,
    /// rather than waiting for the aging scan.
    pub ixf_ticket_on_conflict: bool,
    /// `IXF_NOTIFY_IX_ON_CONFLICT` - email the exchange's technical contacts
    /// when a proposal conflicts.
    pub ixf_notify_ix_on_conflict: bool,
    /// `IXF_NOTIFY_NET_ON_CONFLICT` - email the network's policy contacts
    /// when a proposal conflicts.
    pub ixf_notify_net_on_conflict: bool,
    /// `IXF_IMPORTER_DAYS_UNTIL_TICKET` - age (days) an open proposal must
    /// reach before it is escalated to a ticket. `0` disables escalation.
    pub ixf_importer_days_until_ticket: i64,
    /// `IXF_PARSE_ERROR_NOTIFICATION_PERIOD` - minimum hours between repeat
    /// notifications for the same standing feed-level error.
    pub ixf_parse_error_notification_period: i64,
    /// `IXF_POSTMORTEM_LIMIT` - default/maximum row count for a post-mortem query.
    pub ixf_postmortem_limit: usize,
    /// `IXF_FEED_TIMEOUT_SECS` - HTTP timeout for fetching a feed.
    pub ixf_feed_timeout_secs: u64,
    /// `MAIL_DEBUG` - route mail through the in-memory recorder instead of a
    /// real delivery webhook.
    pub mail_debug: bool,
    /// `EMAIL_SUBJECT_PREFIX` - prefix applied to every generated subject line.
    pub email_subject_prefix: String,
    /// `TICKET_API_BASE_URL` - base URL for the real ticket client.
    pub ticket_api_base_url: Option<String>,
    /// `MAIL_WEBHOOK_URL` - endpoint the real mailer posts rendered messages to.
    pub mail_webhook_url: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            ixf_send_tickets: false,
            ixf_ticket_on_conflict: true,
            ixf_notify_ix_on_conflict: false,
            ixf_notify_net_on_conflict: false,
            ixf_importer_days_until_ticket: 14,
            ixf_parse_error_notification_period: 24,
            ixf_postmortem_limit: 100,
            ixf_feed_timeout_secs: 5,
            mail_debug: true,
            email_subject_prefix: "[IX-F] ".to_string(),
            ticket_api_base_url: None,
            mail_webhook_url: None,
        }
    }
}

impl ReconcilerConfig {
    /// Load settings, overriding defaults with whatever matching environment
    /// variables are set.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let cfg = config::Config::builder()
            .add_source(defaults)
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;
        cfg.try_deserialize()
    }
}
