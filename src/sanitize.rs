use once_cell::sync::Lazy;
use regex::Regex;

/// Hard cap applied to model input, matching the tokenizer's sequence budget.
const MODEL_INPUT_CHARS: usize = 512;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SIGNATURE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)--\s*\n.*").unwrap());
static SENT_FROM: Lazy<Regex> = Lazy::new(|| Regex::new(r"Sent from my.*").unwrap());
static SIGN_OFF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)Best regards.*").unwrap());
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s]+").unwrap());
static EMAIL_ADDR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap());

/// Sanitizes an untrusted request field before it reaches any classifier:
/// null bytes stripped, CRLF normalized, truncated to `max_len` bytes on a
/// char boundary, then trimmed.
pub fn sanitize(text: &str, max_len: usize) -> String {
    let cleaned = text.replace('\0', "").replace("\r\n", "\n");
    let mut end = cleaned.len().min(max_len);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].trim().to_string()
}

/// Prepares sanitized email text for the neural model: subject and body
/// joined, signatures, URLs and addresses removed, whitespace collapsed,
/// truncated to the model's input budget.
pub fn preprocess_for_model(content: &str, subject: &str) -> String {
    let full = if subject.is_empty() {
        content.to_string()
    } else {
        format!("{subject} {content}")
    };

    let text = SIGNATURE.replace(&full, "");
    let text = SENT_FROM.replace(&text, "");
    let text = SIGN_OFF.replace(&text, "");
    let text = URL.replace_all(&text, "");
    let text = EMAIL_ADDR.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");

    let trimmed = text.trim();
    let mut end = trimmed.len().min(MODEL_INPUT_CHARS);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes_and_normalizes_newlines() {
        assert_eq!(sanitize("a\0b\r\nc", 1024), "ab\nc");
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "é".repeat(100); // 2 bytes per char
        let out = sanitize(&text, 15);
        assert!(out.len() <= 15);
        assert!(out.chars().all(|c| c == 'é'));
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(sanitize("", 1024), "");
        assert_eq!(preprocess_for_model("", ""), "");
    }

    #[test]
    fn preprocess_drops_urls_and_addresses() {
        let out = preprocess_for_model(
            "see https://example.com/offer and mail bob@example.com today",
            "Deal",
        );
        assert!(!out.contains("https://"));
        assert!(!out.contains('@'));
        assert!(out.starts_with("Deal"));
    }

    #[test]
    fn preprocess_strips_signature_block() {
        let out = preprocess_for_model("meeting at noon\n-- \nJane Doe\nACME Corp", "");
        assert!(out.contains("meeting at noon"));
        assert!(!out.contains("ACME"));
    }

    #[test]
    fn preprocess_caps_length() {
        let out = preprocess_for_model(&"word ".repeat(500), "");
        assert!(out.len() <= 512);
    }
}
