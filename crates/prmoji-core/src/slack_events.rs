//! Slack Events API envelope decoding.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
/// Outer Events API envelope; `challenge` is only set during URL verification.
pub struct SlackEventEnvelope {
    #[serde(default)]
    pub challenge: Option<String>,
    #[serde(default)]
    pub event: SlackEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SlackEvent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub event_ts: String,
}

impl SlackEventEnvelope {
    /// Returns the verification challenge when the envelope carries a non-blank one.
    pub fn verification_challenge(&self) -> Option<&str> {
        self.challenge
            .as_deref()
            .filter(|challenge| !challenge.trim().is_empty())
    }
}

impl SlackEvent {
    /// A message is ingestible only when text, channel and timestamp are all present.
    pub fn is_ingestible(&self) -> bool {
        !self.text.is_empty() && !self.channel.is_empty() && !self.event_ts.is_empty()
    }
}

pub fn parse_slack_envelope(body: &[u8]) -> Result<SlackEventEnvelope, serde_json::Error> {
    serde_json::from_slice(body)
}

#[cfg(test)]
mod tests {
    use super::parse_slack_envelope;

    #[test]
    fn unit_challenge_envelope_exposes_verification_token() {
        let envelope = parse_slack_envelope(br#"{"type":"url_verification","challenge":"abc123"}"#)
            .expect("parse envelope");
        assert_eq!(envelope.verification_challenge(), Some("abc123"));
        assert!(!envelope.event.is_ingestible());
    }

    #[test]
    fn functional_message_event_is_ingestible() {
        let envelope = parse_slack_envelope(
            br#"{"event":{"type":"message","text":"fix: https://github.com/o/r/pull/7","channel":"C1","event_ts":"100"}}"#,
        )
        .expect("parse envelope");
        assert_eq!(envelope.verification_challenge(), None);
        assert!(envelope.event.is_ingestible());
        assert_eq!(envelope.event.channel, "C1");
        assert_eq!(envelope.event.event_ts, "100");
    }

    #[test]
    fn regression_blank_challenge_does_not_short_circuit() {
        let envelope = parse_slack_envelope(br#"{"challenge":"   ","event":{"text":"hi"}}"#)
            .expect("parse envelope");
        assert_eq!(envelope.verification_challenge(), None);
        assert!(!envelope.event.is_ingestible());
    }

    #[test]
    fn regression_invalid_json_is_an_error() {
        assert!(parse_slack_envelope(b"not json").is_err());
    }
}
