//! Message and channel types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

/// Severity classification of a [`Message`].
///
/// Channels are ordered from least to most severe, so comparisons such as
/// `channel >= Channel::Warning` behave as expected.
///
/// # Example
///
/// ```
/// use codeloom_message::Channel;
///
/// assert!(Channel::Fatal.is_failure());
/// assert!(!Channel::Warning.is_failure());
/// assert_eq!("information".parse::<Channel>().unwrap(), Channel::Information);
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Channel {
    /// Internal detail useful when diagnosing the tool itself.
    Debug,
    /// Extra progress information.
    Verbose,
    /// Regular progress information.
    Information,
    /// A problem that does not prevent a successful run.
    Warning,
    /// A problem that makes the run unsuccessful.
    Error,
    /// A problem that aborts the stage that reported it.
    Fatal,
}

impl Channel {
    /// Returns `true` for channels that make the overall run unsuccessful.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Fatal)
    }
}

/// Errors encountered while parsing a [`Channel`] from text.
pub type ChannelParseError = strum::ParseError;

/// One diagnostic record emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    channel: Channel,
    text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    keys: Vec<String>,
}

impl Message {
    /// Creates a message on the given channel.
    #[must_use]
    pub fn new(channel: Channel, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            details: None,
            plugin: None,
            keys: Vec::new(),
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Records the plugin that emitted the message.
    #[must_use]
    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    /// Attaches classification keys (e.g. validation rule identifiers).
    #[must_use]
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = keys;
        self
    }

    /// Returns the severity channel.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Returns the message text.
    #[must_use]
    pub const fn text(&self) -> &str {
        self.text.as_str()
    }

    /// Returns the structured details, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Returns the emitting plugin, if recorded.
    #[must_use]
    pub fn plugin(&self) -> Option<&str> {
        self.plugin.as_deref()
    }

    /// Returns the classification keys.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{} [{plugin}]: {}", self.channel, self.text),
            None => write!(f, "{}: {}", self.channel, self.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case(Channel::Debug, false)]
    #[case(Channel::Verbose, false)]
    #[case(Channel::Information, false)]
    #[case(Channel::Warning, false)]
    #[case(Channel::Error, true)]
    #[case(Channel::Fatal, true)]
    fn failure_channels(#[case] channel: Channel, #[case] expected: bool) {
        assert_eq!(channel.is_failure(), expected);
    }

    #[rstest]
    fn channels_are_ordered_by_severity() {
        assert!(Channel::Debug < Channel::Verbose);
        assert!(Channel::Warning < Channel::Error);
        assert!(Channel::Error < Channel::Fatal);
    }

    #[rstest]
    #[case("error", Channel::Error)]
    #[case("Warning", Channel::Warning)]
    #[case("FATAL", Channel::Fatal)]
    fn parses_channel_names(#[case] text: &str, #[case] expected: Channel) {
        assert_eq!(text.parse::<Channel>().expect("parse channel"), expected);
    }

    #[rstest]
    fn rejects_unknown_channel() {
        assert!("loud".parse::<Channel>().is_err());
    }

    #[rstest]
    fn serialises_without_empty_optionals() {
        let message = Message::new(Channel::Information, "loaded");
        let json = serde_json::to_value(&message).expect("serialise");

        assert_eq!(json, json!({"channel": "information", "text": "loaded"}));
    }

    #[rstest]
    fn deserialises_wire_message() {
        let json = json!({
            "channel": "error",
            "text": "missing operationId",
            "details": {"path": "/pets"},
            "keys": ["R1001"]
        });
        let message: Message = serde_json::from_value(json).expect("deserialise");

        assert_eq!(message.channel(), Channel::Error);
        assert_eq!(message.keys(), ["R1001".to_owned()]);
        assert_eq!(message.details(), Some(&json!({"path": "/pets"})));
        assert!(message.plugin().is_none());
    }

    #[rstest]
    fn display_includes_plugin() {
        let message = Message::new(Channel::Warning, "slow").with_plugin("modeler");
        assert_eq!(message.to_string(), "warning [modeler]: slow");
    }
}
