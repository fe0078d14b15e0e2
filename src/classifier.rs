//! Recognizes login-code notices and extracts the code.
//!
//! Matching is byte-for-byte on whole lines: the notices come from a fixed,
//! machine-generated template, so anything that deviates is simply "not this
//! kind of mail".
//!
//! # Example
//!
//! ```
//! use code_relay::classifier::{Classification, Classifier, LoginCodeTemplate};
//!
//! let message: Vec<Vec<u8>> = [
//!     "From: Your Friends <yourfriends@streamyard.com>",
//!     "Subject: StreamYard Login Code",
//!     "",
//!     "Your login code is:",
//!     "",
//!     "482913",
//! ]
//! .iter()
//! .map(|l| l.as_bytes().to_vec())
//! .collect();
//!
//! let template = LoginCodeTemplate::streamyard();
//! assert_eq!(
//!     template.classify(&message),
//!     Classification::MatchedWithCode("482913".into())
//! );
//! ```

/// Outcome of classifying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The header signature is not present.
    NotMatched,
    /// The headers match but the code line is missing or unusable.
    MatchedNoCode,
    /// The code was found.
    MatchedWithCode(String),
}

impl Classification {
    /// Returns the extracted code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Classification::MatchedWithCode(code) => Some(code),
            Classification::NotMatched | Classification::MatchedNoCode => None,
        }
    }
}

/// Decides whether a message is a login-code notice.
///
/// Implementations must be deterministic: the same lines always yield the same
/// classification.
pub trait Classifier: Send + Sync {
    /// Classifies the raw lines of a message (headers followed by body).
    fn classify(&self, lines: &[Vec<u8>]) -> Classification;

    /// Returns a human-readable description, used in logs.
    fn description(&self) -> &str;
}

/// Exact-line template for a machine-generated login-code notice.
///
/// A message matches when it contains one of the accepted sender lines and the
/// subject line. The code is the line `code_offset` lines after the first
/// marker line that follows the headers.
#[derive(Debug, Clone)]
pub struct LoginCodeTemplate {
    senders: Vec<Vec<u8>>,
    subject: Vec<u8>,
    markers: Vec<Vec<u8>>,
    code_offset: usize,
    description: String,
}

impl LoginCodeTemplate {
    /// Creates a template with a single sender, subject and marker line.
    ///
    /// The default code offset is 2 (marker, blank line, code).
    #[must_use]
    pub fn new(sender: &str, subject: &str, marker: &str) -> Self {
        Self {
            senders: vec![sender.as_bytes().to_vec()],
            subject: subject.as_bytes().to_vec(),
            markers: vec![marker.as_bytes().to_vec()],
            code_offset: 2,
            description: format!("login code notice '{subject}'"),
        }
    }

    /// The StreamYard login-code notice.
    ///
    /// The first sender and marker lines are the observed wording. The
    /// `From: StreamYard` sender and the `Your StreamYard login code is:` marker
    /// are assumed wording for the newer generation of the notice; adjust with
    /// [`with_sender`](Self::with_sender) and [`with_marker`](Self::with_marker)
    /// if the real text differs.
    #[must_use]
    pub fn streamyard() -> Self {
        Self::new(
            "From: Your Friends <yourfriends@streamyard.com>",
            "Subject: StreamYard Login Code",
            "Your login code is:",
        )
        .with_sender("From: StreamYard <yourfriends@streamyard.com>")
        .with_marker("Your StreamYard login code is:")
    }

    /// Accepts an additional sender line.
    #[must_use]
    pub fn with_sender(mut self, sender: &str) -> Self {
        self.senders.push(sender.as_bytes().to_vec());
        self
    }

    /// Accepts an additional marker line.
    #[must_use]
    pub fn with_marker(mut self, marker: &str) -> Self {
        self.markers.push(marker.as_bytes().to_vec());
        self
    }

    /// Sets how many lines after the marker the code sits.
    #[must_use]
    pub fn with_code_offset(mut self, offset: usize) -> Self {
        self.code_offset = offset;
        self
    }

    /// Returns the body cursor: the line just past the later of the two headers,
    /// or `None` if either header is missing.
    fn body_start(&self, lines: &[Vec<u8>]) -> Option<usize> {
        let mut sender_seen = false;
        let mut subject_seen = false;

        for (position, line) in lines.iter().enumerate() {
            if !sender_seen && self.senders.contains(line) {
                sender_seen = true;
            } else if !subject_seen && *line == self.subject {
                subject_seen = true;
            }

            if sender_seen && subject_seen {
                return Some(position + 1);
            }
        }
        None
    }
}

impl Classifier for LoginCodeTemplate {
    fn classify(&self, lines: &[Vec<u8>]) -> Classification {
        let Some(cursor) = self.body_start(lines) else {
            return Classification::NotMatched;
        };

        let Some(marker) = lines[cursor..]
            .iter()
            .position(|line| self.markers.contains(line))
        else {
            return Classification::MatchedNoCode;
        };

        let target = cursor + marker + self.code_offset;
        let Some(line) = lines.get(target) else {
            return Classification::MatchedNoCode;
        };

        match std::str::from_utf8(line) {
            Ok(code) if !code.trim().is_empty() => Classification::MatchedWithCode(code.to_string()),
            _ => Classification::MatchedNoCode,
        }
    }

    fn description(&self) -> &str {
        &self.description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &[&str]) -> Vec<Vec<u8>> {
        text.iter().map(|l| l.as_bytes().to_vec()).collect()
    }

    const SENDER: &str = "From: Your Friends <yourfriends@streamyard.com>";
    const SUBJECT: &str = "Subject: StreamYard Login Code";

    #[test]
    fn test_full_match() {
        let message = lines(&[
            "Return-Path: <bounce@streamyard.com>",
            SENDER,
            "To: team@example.com",
            SUBJECT,
            "Content-Type: text/plain",
            "",
            "Hi there,",
            "Your login code is:",
            "",
            "482913",
            "",
            "Thanks",
        ]);

        let result = LoginCodeTemplate::streamyard().classify(&message);
        assert_eq!(result, Classification::MatchedWithCode("482913".into()));
        assert_eq!(result.code(), Some("482913"));
    }

    #[test]
    fn test_subject_before_sender() {
        let message = lines(&[SUBJECT, SENDER, "", "Your login code is:", "", "111222"]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedWithCode("111222".into())
        );
    }

    #[test]
    fn test_marker_missing() {
        let message = lines(&[SENDER, SUBJECT, "", "Welcome back!", "482913"]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedNoCode
        );
    }

    #[test]
    fn test_code_line_past_end() {
        let message = lines(&[SENDER, SUBJECT, "", "Your login code is:", ""]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedNoCode
        );
    }

    #[test]
    fn test_blank_code_line() {
        let message = lines(&[SENDER, SUBJECT, "Your login code is:", "", "   "]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedNoCode
        );
    }

    #[test]
    fn test_invalid_utf8_code() {
        let mut message = lines(&[SENDER, SUBJECT, "Your login code is:", ""]);
        message.push(vec![0xff, 0xfe, 0x31]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedNoCode
        );
    }

    #[test]
    fn test_other_sender() {
        let message = lines(&[
            "From: Newsletter <news@example.com>",
            SUBJECT,
            "",
            "Your login code is:",
            "",
            "482913",
        ]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::NotMatched
        );
    }

    #[test]
    fn test_headers_must_match_exactly() {
        let message = lines(&[
            "From: Your Friends <yourfriends@streamyard.com> ",
            "subject: StreamYard Login Code",
            "Your login code is:",
            "",
            "482913",
        ]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::NotMatched
        );
    }

    #[test]
    fn test_repeated_sender_counts_once() {
        let message = lines(&[SENDER, SENDER, "", "Your login code is:", "", "482913"]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::NotMatched
        );
    }

    #[test]
    fn test_marker_inside_headers_is_ignored() {
        // A marker before the body cursor must not be used.
        let message = lines(&["Your login code is:", SENDER, "999999", SUBJECT, ""]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedNoCode
        );
    }

    #[test]
    fn test_second_generation_variant() {
        let message = lines(&[
            "From: StreamYard <yourfriends@streamyard.com>",
            SUBJECT,
            "",
            "Your StreamYard login code is:",
            "",
            "730001",
        ]);
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&message),
            Classification::MatchedWithCode("730001".into())
        );
    }

    #[test]
    fn test_custom_offset() {
        let template =
            LoginCodeTemplate::new("From: a@b.c", "Subject: code", "Code:").with_code_offset(1);
        let message = lines(&["From: a@b.c", "Subject: code", "Code:", "ABC-123"]);
        assert_eq!(
            template.classify(&message),
            Classification::MatchedWithCode("ABC-123".into())
        );
        assert_eq!(template.description(), "login code notice 'Subject: code'");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let template = LoginCodeTemplate::streamyard();
        let message = lines(&[SENDER, SUBJECT, "Your login code is:", "", "482913"]);
        let first = template.classify(&message);
        for _ in 0..3 {
            assert_eq!(template.classify(&message), first);
        }
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(
            LoginCodeTemplate::streamyard().classify(&[]),
            Classification::NotMatched
        );
    }
}
