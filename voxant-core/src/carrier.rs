//! Carrier-facing markup and webhook authentication.
//!
//! The carrier plays whatever the returned XML document instructs: `<Play>`
//! for synthesized audio, `<Say>` as the native-voice fallback, `<Gather>` to
//! collect the next utterance, `<Hangup>` to end the call. Webhook requests
//! are authenticated with HMAC-SHA256 over the canonical URL plus the
//! alphabetically sorted form fields, compared in constant time.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-carrier-signature";

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Voice output: a hosted audio URL or carrier-native speech.
#[derive(Debug, Clone)]
pub enum VoiceOutput {
    Play { url: String },
    Say { text: String },
}

impl VoiceOutput {
    fn render(&self, out: &mut String) {
        match self {
            VoiceOutput::Play { url } => {
                out.push_str("<Play>");
                out.push_str(&xml_escape(url));
                out.push_str("</Play>");
            }
            VoiceOutput::Say { text } => {
                out.push_str("<Say>");
                out.push_str(&xml_escape(text));
                out.push_str("</Say>");
            }
        }
    }
}

/// Markup for one turn: speak, then gather the next utterance with the given
/// action URL and carrier-side timeout.
pub fn gather_markup(output: &VoiceOutput, action: &str, timeout_secs: u8) -> String {
    let mut out = String::from("<Response>");
    out.push_str(&format!(
        "<Gather input=\"speech\" action=\"{}\" method=\"POST\" timeout=\"{}\" speechTimeout=\"auto\">",
        xml_escape(action),
        timeout_secs
    ));
    output.render(&mut out);
    out.push_str("</Gather>");
    // If the gather times out with no speech, close the call politely
    VoiceOutput::Say {
        text: "Thanks for your time. Goodbye.".to_string(),
    }
    .render(&mut out);
    out.push_str("<Hangup/></Response>");
    out
}

/// Markup for a terminal turn: speak, then hang up.
pub fn hangup_markup(output: &VoiceOutput) -> String {
    let mut out = String::from("<Response>");
    output.render(&mut out);
    out.push_str("<Hangup/></Response>");
    out
}

/// Minimal valid document for state violations and malformed requests.
pub fn empty_markup() -> String {
    "<Response></Response>".to_string()
}

/// Compute the webhook signature: HMAC-SHA256 over the canonical URL with
/// each form field appended in key order, base64 encoded.
pub fn compute_signature(url: &str, params: &BTreeMap<String, String>, auth_token: &str) -> String {
    let mut data = url.to_string();
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }
    let mut mac =
        HmacSha256::new_from_slice(auth_token.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature in constant time.
pub fn verify_signature(
    signature: &str,
    url: &str,
    params: &BTreeMap<String, String>,
    auth_token: &str,
) -> bool {
    if signature.is_empty() || auth_token.is_empty() {
        return false;
    }
    let mut data = url.to_string();
    for (key, value) in params {
        data.push_str(key);
        data.push_str(value);
    }
    let mut mac =
        HmacSha256::new_from_slice(auth_token.as_bytes()).expect("hmac accepts any key length");
    mac.update(data.as_bytes());

    let Ok(provided) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_gather_markup_with_play() {
        let markup = gather_markup(
            &VoiceOutput::Play {
                url: "https://example.com/calls/1/tts/tts_abc.mp3".to_string(),
            },
            "/webhook/1/turn",
            5,
        );
        assert!(markup.starts_with("<Response>"));
        assert!(markup.contains("<Play>https://example.com/calls/1/tts/tts_abc.mp3</Play>"));
        assert!(markup.contains("timeout=\"5\""));
        assert!(markup.contains("action=\"/webhook/1/turn\""));
        assert!(markup.ends_with("<Hangup/></Response>"));
    }

    #[test]
    fn test_gather_markup_say_fallback_escapes() {
        let markup = gather_markup(
            &VoiceOutput::Say {
                text: "Tom & Jerry <quote>".to_string(),
            },
            "/webhook/2/turn",
            4,
        );
        assert!(markup.contains("<Say>Tom &amp; Jerry &lt;quote&gt;</Say>"));
    }

    #[test]
    fn test_hangup_markup() {
        let markup = hangup_markup(&VoiceOutput::Say {
            text: "Goodbye.".to_string(),
        });
        assert_eq!(markup, "<Response><Say>Goodbye.</Say><Hangup/></Response>");
    }

    #[test]
    fn test_signature_round_trip() {
        let url = "https://host.example/webhook/7/turn";
        let p = params(&[("SpeechResult", "hello there"), ("CallSid", "CA123")]);
        let sig = compute_signature(url, &p, "secret-token");
        assert!(verify_signature(&sig, url, &p, "secret-token"));
    }

    #[test]
    fn test_signature_sorted_field_order() {
        let url = "https://host.example/webhook/7/turn";
        let a = params(&[("b", "2"), ("a", "1")]);
        let b = params(&[("a", "1"), ("b", "2")]);
        assert_eq!(
            compute_signature(url, &a, "tok"),
            compute_signature(url, &b, "tok")
        );
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let url = "https://host.example/webhook/7/turn";
        let p = params(&[("SpeechResult", "hello")]);
        let sig = compute_signature(url, &p, "secret-token");

        let tampered = params(&[("SpeechResult", "transfer all funds")]);
        assert!(!verify_signature(&sig, url, &tampered, "secret-token"));
        assert!(!verify_signature(&sig, "https://evil.example/x", &p, "secret-token"));
        assert!(!verify_signature(&sig, url, &p, "other-token"));
    }

    #[test]
    fn test_signature_rejects_empty_or_garbage() {
        let p = params(&[]);
        assert!(!verify_signature("", "u", &p, "tok"));
        assert!(!verify_signature("not base64 !!!", "u", &p, "tok"));
        assert!(!verify_signature("c2ln", "u", &p, ""));
    }

    #[test]
    fn test_empty_markup_is_minimal() {
        assert_eq!(empty_markup(), "<Response></Response>");
    }
}
