use reqwest::StatusCode;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Mild,
    Moderate,
    Severe,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Mild => "MILD",
            Severity::Moderate => "MODERATE",
            Severity::Severe => "SEVERE",
        })
    }
}

/// Opaque reference to whatever the surface needs to perform a retry action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryHandle(String);

impl RetryHandle {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentionSignal {
    pub detected: bool,
    pub matched_keywords: BTreeSet<String>,
    pub severity: Severity,
    pub retry_handle: Option<RetryHandle>,
}

impl ContentionSignal {
    pub fn new(
        keywords: impl IntoIterator<Item = String>,
        severity: Severity,
        retry_handle: Option<RetryHandle>,
    ) -> Self {
        Self {
            detected: true,
            matched_keywords: keywords.into_iter().collect(),
            severity,
            retry_handle,
        }
    }

    pub fn with_retry_handle(mut self, handle: RetryHandle) -> Self {
        self.retry_handle = Some(handle);
        self
    }

    pub fn summary(&self) -> String {
        if self.matched_keywords.is_empty() {
            return self.severity.to_string();
        }
        let keywords: Vec<&str> = self.matched_keywords.iter().map(String::as_str).collect();
        format!("{}: {}", self.severity, keywords.join(", "))
    }
}

/// Keyword-based classifier for "temporarily unavailable" responses.
#[derive(Debug, Clone)]
pub struct ContentionDetector {
    keywords: Vec<String>,
}

impl ContentionDetector {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Severity grows with the number of distinct markers found; 429 and 503 count as
    /// contention on their own and floor the severity at MODERATE.
    pub fn classify(&self, status: Option<StatusCode>, text: &str) -> Option<ContentionSignal> {
        let haystack = text.to_lowercase();
        let matched: BTreeSet<String> = self
            .keywords
            .iter()
            .filter(|k| haystack.contains(k.as_str()))
            .cloned()
            .collect();

        let status_signal = matches!(
            status,
            Some(StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE)
        );

        let by_keywords = match matched.len() {
            0 => None,
            1 => Some(Severity::Mild),
            2 => Some(Severity::Moderate),
            _ => Some(Severity::Severe),
        };

        let severity = match (by_keywords, status_signal) {
            (None, false) => return None,
            (None, true) => Severity::Moderate,
            (Some(s), true) => s.max(Severity::Moderate),
            (Some(s), false) => s,
        };

        Some(ContentionSignal::new(matched, severity, None))
    }
}
