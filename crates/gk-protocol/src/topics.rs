//! MQTT topic names for one gate site.
//!
//! Topic structure:
//! ```text
//! {site}/gate/cmd          backend → controller
//! {site}/gate/ack          controller → backend
//! {site}/gate/status       controller → backend (heartbeat)
//! {site}/gate/diagnostics  controller → backend (after reconnect)
//! ```
//!
//! The four topics are independent channels; there is no ordering
//! guarantee between them.

use serde::Deserialize;

const DEFAULT_SITE: &str = "pgr/mitspe6";

/// Which channel a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Command,
    Ack,
    Status,
    Diagnostics,
}

/// The full set of topic names used by one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicSet {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_ack")]
    pub ack: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_diagnostics")]
    pub diagnostics: String,
}

fn default_command() -> String {
    command(DEFAULT_SITE)
}

fn default_ack() -> String {
    ack(DEFAULT_SITE)
}

fn default_status() -> String {
    status(DEFAULT_SITE)
}

fn default_diagnostics() -> String {
    diagnostics(DEFAULT_SITE)
}

// ─── Builders ───

pub fn command(site: &str) -> String {
    format!("{site}/gate/cmd")
}

pub fn ack(site: &str) -> String {
    format!("{site}/gate/ack")
}

pub fn status(site: &str) -> String {
    format!("{site}/gate/status")
}

pub fn diagnostics(site: &str) -> String {
    format!("{site}/gate/diagnostics")
}

impl TopicSet {
    /// Topic names for a site prefix such as `pgr/mitspe6`.
    pub fn for_site(site: &str) -> Self {
        Self {
            command: command(site),
            ack: ack(site),
            status: status(site),
            diagnostics: diagnostics(site),
        }
    }

    /// Classify an exact topic name. Returns `None` for foreign topics.
    pub fn kind(&self, topic: &str) -> Option<TopicKind> {
        if topic == self.ack {
            Some(TopicKind::Ack)
        } else if topic == self.status {
            Some(TopicKind::Status)
        } else if topic == self.diagnostics {
            Some(TopicKind::Diagnostics)
        } else if topic == self.command {
            Some(TopicKind::Command)
        } else {
            None
        }
    }

    /// Topics the backend listens on.
    pub fn backend_subscriptions(&self) -> [&str; 3] {
        [&self.ack, &self.status, &self.diagnostics]
    }
}

impl Default for TopicSet {
    fn default() -> Self {
        Self::for_site(DEFAULT_SITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topics() {
        let topics = TopicSet::default();
        assert_eq!(topics.command, "pgr/mitspe6/gate/cmd");
        assert_eq!(topics.ack, "pgr/mitspe6/gate/ack");
        assert_eq!(topics.status, "pgr/mitspe6/gate/status");
        assert_eq!(topics.diagnostics, "pgr/mitspe6/gate/diagnostics");
    }

    #[test]
    fn classify_known_topics() {
        let topics = TopicSet::for_site("site-a");
        assert_eq!(topics.kind("site-a/gate/ack"), Some(TopicKind::Ack));
        assert_eq!(topics.kind("site-a/gate/status"), Some(TopicKind::Status));
        assert_eq!(topics.kind("site-a/gate/cmd"), Some(TopicKind::Command));
        assert_eq!(
            topics.kind("site-a/gate/diagnostics"),
            Some(TopicKind::Diagnostics)
        );
    }

    #[test]
    fn classify_foreign_topic() {
        let topics = TopicSet::default();
        assert!(topics.kind("pgr/other/gate/ack").is_none());
        assert!(topics.kind("").is_none());
    }

    #[test]
    fn backend_does_not_subscribe_to_commands() {
        let topics = TopicSet::default();
        assert!(!topics.backend_subscriptions().contains(&"pgr/mitspe6/gate/cmd"));
    }

    #[test]
    fn partial_toml_style_config_uses_defaults() {
        let topics: TopicSet = serde_json::from_str(r#"{"ack":"x/ack"}"#).unwrap();
        assert_eq!(topics.ack, "x/ack");
        assert_eq!(topics.command, "pgr/mitspe6/gate/cmd");
    }
}
