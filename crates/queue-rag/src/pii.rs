//! Pattern-based PII detection and redaction
//!
//! Three substitutions run in a fixed order, each over the output of the
//! previous one: emails, then phone numbers, then candidate personal names.

use once_cell::sync::Lazy;
use regex::{Match, Regex};

/// Marker replacing an email address
pub const EMAIL_MARKER: &str = "[EMAIL]";
/// Marker replacing a phone number
pub const PHONE_MARKER: &str = "[PHONE]";
/// Marker replacing a candidate personal name
pub const NAME_MARKER: &str = "[NAME]";

/// Tokens that never start or continue a name candidate, compared ignoring case
/// (the word matcher only yields capitalized tokens, so `and` acts as `And`)
const NAME_STOPWORDS: &[&str] = &["Mr", "Mr.", "Ms", "Ms.", "Dr", "Dr.", "Mrs", "and"];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});

// (DDD) DDD-DDDD or DDD-DDD-DDDD
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\([0-9]{3}\)\s*[0-9]{3}-[0-9]{4}|[0-9]{3}-[0-9]{3}-[0-9]{4}").unwrap()
});

static CAPITALIZED_WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+\b").unwrap());

/// Counts of what a redaction pass replaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactionReport {
    pub emails: usize,
    pub phones: usize,
    pub names: usize,
}

impl RedactionReport {
    /// Total number of replacements
    pub fn total(&self) -> usize {
        self.emails + self.phones + self.names
    }
}

/// Best-effort PII filter.
///
/// The name detector is a heuristic: it redacts pairs of adjacent capitalized
/// words, so it over-redacts capitalized phrases and misses single-word or
/// lower-case names.
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor;

impl PiiRedactor {
    /// Create a redactor
    pub fn new() -> Self {
        Self
    }

    /// Redact emails, phone numbers and names
    pub fn redact(&self, text: &str) -> String {
        self.redact_with_report(text).0
    }

    /// Redact and report what was replaced
    pub fn redact_with_report(&self, text: &str) -> (String, RedactionReport) {
        let mut report = RedactionReport::default();

        report.emails = EMAIL_RE.find_iter(text).count();
        let text = EMAIL_RE.replace_all(text, EMAIL_MARKER);

        report.phones = PHONE_RE.find_iter(&text).count();
        let text = PHONE_RE.replace_all(&text, PHONE_MARKER);

        let spans = name_spans(&text);
        report.names = spans.len();
        let text = replace_spans(&text, &spans, NAME_MARKER);

        (text, report)
    }
}

/// Byte ranges of name candidates, in text order.
///
/// Capitalized words separated only by whitespace form a run; stopwords break
/// runs. Each run is paired off from its right end, so a lone leading word
/// (typically sentence-initial, as in "Contact John Smith") is left alone.
fn name_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut run: Vec<Match<'_>> = Vec::new();

    for word in CAPITALIZED_WORD_RE.find_iter(text) {
        if is_stopword(word.as_str()) {
            close_run(&mut run, &mut spans);
            continue;
        }

        if let Some(prev) = run.last() {
            let gap = &text[prev.end()..word.start()];
            if gap.is_empty() || !gap.chars().all(char::is_whitespace) {
                close_run(&mut run, &mut spans);
            }
        }
        run.push(word);
    }
    close_run(&mut run, &mut spans);

    spans.sort_unstable();
    spans
}

fn is_stopword(word: &str) -> bool {
    NAME_STOPWORDS.iter().any(|stop| stop.eq_ignore_ascii_case(word))
}

fn close_run(run: &mut Vec<Match<'_>>, spans: &mut Vec<(usize, usize)>) {
    let mut end = run.len();
    while end >= 2 {
        spans.push((run[end - 2].start(), run[end - 1].end()));
        end -= 2;
    }
    run.clear();
}

fn replace_spans(text: &str, spans: &[(usize, usize)], marker: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for &(start, end) in spans {
        out.push_str(&text[cursor..start]);
        out.push_str(marker);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redact(text: &str) -> String {
        PiiRedactor::new().redact(text)
    }

    #[test]
    fn test_contact_sentence() {
        assert_eq!(
            redact("Contact John Smith at john@example.com or 555-123-4567"),
            "Contact [NAME] at [EMAIL] or [PHONE]"
        );
    }

    #[test]
    fn test_email_redaction() {
        let out = redact("reach me at jane.doe+news@mail.example.co.uk today");
        assert_eq!(out, "reach me at [EMAIL] today");
        assert!(!out.contains('@'));
    }

    #[test]
    fn test_phone_formats() {
        assert_eq!(redact("call (555) 123-4567 now"), "call [PHONE] now");
        assert_eq!(redact("call (555)123-4567 now"), "call [PHONE] now");
        assert_eq!(redact("call 555-123-4567 now"), "call [PHONE] now");
        // Not one of the accepted forms
        assert_eq!(redact("call 5551234567 now"), "call 5551234567 now");
    }

    #[test]
    fn test_plain_name_pair() {
        assert_eq!(redact("Ada Lovelace"), "[NAME]");
        // Prefix of an honorific is not an honorific
        assert_eq!(redact("Drake Bell"), "[NAME]");
        assert_eq!(redact("Andrea Ghez"), "[NAME]");
    }

    #[test]
    fn test_honorifics_are_kept() {
        assert_eq!(redact("Dr Jane Doe"), "Dr [NAME]");
        assert_eq!(redact("Mrs Jane Doe"), "Mrs [NAME]");
        assert_eq!(redact("ask Mr. Smith"), "ask Mr. Smith");
    }

    #[test]
    fn test_long_runs_pair_from_the_right() {
        assert_eq!(redact("Alice Brown Bob Green"), "[NAME] [NAME]");
        assert_eq!(redact("Meet Alice Brown"), "Meet [NAME]");
    }

    #[test]
    fn test_leading_word_of_odd_run_stays_visible() {
        assert_eq!(redact("met John Smith Tuesday"), "met John [NAME]");
    }

    #[test]
    fn test_sentence_initial_and_is_a_stopword() {
        assert_eq!(redact("And Jane met him"), "And Jane met him");
        assert_eq!(redact("Tom and Jerry"), "Tom and Jerry");
        assert_eq!(redact("And Jane Doe left"), "And [NAME] left");
    }

    #[test]
    fn test_punctuation_breaks_runs() {
        assert_eq!(redact("Hello, World"), "Hello, World");
        assert_eq!(redact("Smith. Jones"), "Smith. Jones");
    }

    #[test]
    fn test_markers_are_stable() {
        let once = redact("Contact John Smith at john@example.com or (555) 123-4567");
        assert_eq!(redact(&once), once);
        assert_eq!(redact("[NAME] [EMAIL] [PHONE]"), "[NAME] [EMAIL] [PHONE]");
    }

    #[test]
    fn test_report_counts() {
        let (_, report) = PiiRedactor::new()
            .redact_with_report("John Smith, john@example.com, 555-123-4567, 555-000-1111");
        assert_eq!(
            report,
            RedactionReport {
                emails: 1,
                phones: 2,
                names: 1,
            }
        );
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn test_text_without_pii_is_unchanged() {
        let text = "what is the refund policy for orders over 30 days?";
        assert_eq!(redact(text), text);
    }
}
