use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const REDACTED_MASK: &str = "****REDACTED****";

static PAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{13,19}\b").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9._%+-]+)(@[A-Za-z0-9.-]+\.[A-Za-z]{2,})").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static AADHAAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4} \d{4} \d{4}\b").unwrap());

/// Result of redacting a single string: the masked text plus whether anything changed.
#[derive(Debug, Clone)]
pub struct RedactedString {
    pub redacted: String,
    pub masked: bool,
}

/// PAN/email/SSN/Aadhaar redactor applied bidirectionally to every HTTP body.
///
/// Stateless and cheap to construct; held as a single shared instance behind the
/// middleware layer.
#[derive(Debug, Clone, Default)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    pub fn redact_string(&self, input: &str) -> RedactedString {
        let mut masked = false;
        let mut output = input.to_string();

        if PAN_RE.is_match(&output) {
            masked = true;
            output = PAN_RE.replace_all(&output, REDACTED_MASK).into_owned();
        }

        if SSN_RE.is_match(&output) {
            masked = true;
            output = SSN_RE.replace_all(&output, REDACTED_MASK).into_owned();
        }

        if AADHAAR_RE.is_match(&output) {
            masked = true;
            output = AADHAAR_RE.replace_all(&output, REDACTED_MASK).into_owned();
        }

        if EMAIL_RE.is_match(&output) {
            masked = true;
            output = EMAIL_RE
                .replace_all(&output, |caps: &regex::Captures| {
                    let local = &caps[1];
                    let domain = &caps[2];
                    let prefix: String = local.chars().take(2).collect();
                    format!("{prefix}***{domain}")
                })
                .into_owned();
        }

        RedactedString {
            redacted: output,
            masked,
        }
    }

    /// Recursively walk a JSON value, redacting string leaves and blanket-masking
    /// any object value whose key name contains "pan" (case-insensitive).
    pub fn redact_value(&self, value: &Value) -> (Value, bool) {
        match value {
            Value::String(s) => {
                let result = self.redact_string(s);
                (Value::String(result.redacted), result.masked)
            }
            Value::Array(items) => {
                let mut masked = false;
                let redacted = items
                    .iter()
                    .map(|item| {
                        let (value, item_masked) = self.redact_value(item);
                        masked |= item_masked;
                        value
                    })
                    .collect();
                (Value::Array(redacted), masked)
            }
            Value::Object(map) => {
                let mut masked = false;
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    if key.to_ascii_lowercase().contains("pan") {
                        out.insert(key.clone(), Value::String(REDACTED_MASK.to_string()));
                        masked = true;
                        continue;
                    }
                    let (value, value_masked) = self.redact_value(value);
                    masked |= value_masked;
                    out.insert(key.clone(), value);
                }
                (Value::Object(out), masked)
            }
            other => (other.clone(), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_card_number_and_email() {
        let redactor = Redactor::new();
        let result = redactor.redact_string(
            "My card 4111111111111111 and email john@example.com",
        );
        assert!(result.masked);
        assert_eq!(
            result.redacted,
            "My card ****REDACTED**** and email jo***@example.com"
        );
        assert!(!result.redacted.contains("4111111111111111"));
    }

    #[test]
    fn redacts_ssn_and_aadhaar() {
        let redactor = Redactor::new();
        assert!(redactor.redact_string("SSN 123-45-6789").masked);
        assert!(redactor.redact_string("Aadhaar 1234 5678 9012").masked);
    }

    #[test]
    fn leaves_clean_strings_untouched() {
        let redactor = Redactor::new();
        let result = redactor.redact_string("no sensitive data here");
        assert!(!result.masked);
        assert_eq!(result.redacted, "no sensitive data here");
    }

    #[test]
    fn walks_nested_json_and_masks_pan_keyed_fields() {
        let redactor = Redactor::new();
        let value = json!({
            "cardPan": "4111111111111111",
            "nested": {"note": "contact jane@example.com"},
            "items": ["plain", "123-45-6789"]
        });
        let (redacted, masked) = redactor.redact_value(&value);
        assert!(masked);
        assert_eq!(redacted["cardPan"], json!("****REDACTED****"));
        assert_eq!(redacted["nested"]["note"], json!("contact ja***@example.com"));
        assert_eq!(redacted["items"][1], json!("****REDACTED****"));
    }
}
