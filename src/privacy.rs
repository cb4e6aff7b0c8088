use chrono::{NaiveTime, Timelike};

use crate::config::AppConfig;
use crate::models::{NewCapture, Source};

/// Policy snapshot the filter is evaluated against. Hot-reloadable between
/// invocations (swap the `Arc` the caller holds) but never mutated
/// mid-invocation — the filter itself is a pure function over `(capture,
/// policy)`.
#[derive(Debug, Clone)]
pub struct PrivacyPolicy {
    pub blocked_apps: Vec<String>,
    pub blocked_urls: Vec<String>,
    pub blocked_keywords: Vec<String>,
    pub quiet_hours: Option<(NaiveTime, NaiveTime)>,
}

impl PrivacyPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        let quiet_hours = match (&config.quiet_hours_start, &config.quiet_hours_end) {
            (Some(start), Some(end)) => {
                match (
                    NaiveTime::parse_from_str(start, "%H:%M"),
                    NaiveTime::parse_from_str(end, "%H:%M"),
                ) {
                    (Ok(s), Ok(e)) => Some((s, e)),
                    _ => None,
                }
            }
            _ => None,
        };
        Self {
            blocked_apps: lower_all(&config.blocked_apps),
            blocked_urls: lower_all(&config.blocked_urls),
            blocked_keywords: lower_all(&config.blocked_keywords),
            quiet_hours,
        }
    }

    fn in_quiet_hours(&self, now: NaiveTime) -> bool {
        match self.quiet_hours {
            None => false,
            Some((start, end)) if start <= end => now >= start && now < end,
            // wraps past midnight
            Some((start, end)) => now >= start || now < end,
        }
    }
}

fn lower_all(v: &[String]) -> Vec<String> {
    v.iter().map(|s| s.to_lowercase()).collect()
}

/// Outcome of applying the privacy filter to a candidate capture.
#[derive(Debug, Clone)]
pub enum FilterDecision {
    Accept(NewCapture),
    Drop,
}

/// Apply the five rules from `spec.md` §4.2, in order. Pure: no I/O, no
/// shared mutable state beyond the policy snapshot passed in.
pub fn apply(capture: NewCapture, policy: &PrivacyPolicy, now: NaiveTime) -> FilterDecision {
    // 1. blocked app for window captures.
    if capture.source == Source::Window {
        if let Some(app_class) = capture.metadata.get("app_class") {
            if policy.blocked_apps.iter().any(|a| a == &app_class.to_lowercase()) {
                return FilterDecision::Drop;
            }
        }
    }

    // 2. URL substring match against any metadata value.
    if !policy.blocked_urls.is_empty() {
        for value in capture.metadata.values() {
            let lower = value.to_lowercase();
            if policy.blocked_urls.iter().any(|u| lower.contains(u.as_str())) {
                return FilterDecision::Drop;
            }
        }
    }

    // 3. blocked keywords: drop clipboard outright, redact screen OCR spans.
    if !policy.blocked_keywords.is_empty() {
        if let Some(text) = capture.text_data.clone() {
            let matched = find_keyword_matches(&text, &policy.blocked_keywords);
            if !matched.is_empty() {
                match capture.source {
                    Source::Clipboard => return FilterDecision::Drop,
                    Source::Screen => {
                        let redacted = redact_spans(&text, &matched);
                        let mut capture = capture;
                        capture.text_data = Some(redacted);
                        return finish(capture, policy, now);
                    }
                    _ => return FilterDecision::Drop,
                }
            }
        }
    }

    finish(capture, policy, now)
}

fn finish(capture: NewCapture, policy: &PrivacyPolicy, now: NaiveTime) -> FilterDecision {
    // 4. quiet hours drop screen/clipboard.
    if matches!(capture.source, Source::Screen | Source::Clipboard) && policy.in_quiet_hours(now) {
        return FilterDecision::Drop;
    }
    // 5. otherwise unchanged.
    FilterDecision::Accept(capture)
}

/// Word-boundary-aware, case-insensitive keyword search. Returns the byte
/// ranges (in the original string) of every match, sorted and
/// non-overlapping.
fn find_keyword_matches(text: &str, keywords: &[String]) -> Vec<(usize, usize)> {
    let lower = text.to_lowercase();
    let mut spans = Vec::new();
    for kw in keywords {
        if kw.is_empty() {
            continue;
        }
        let mut start = 0;
        while let Some(pos) = lower[start..].find(kw.as_str()) {
            let abs_start = start + pos;
            let abs_end = abs_start + kw.len();
            let before_ok = abs_start == 0 || !is_word_char(lower.as_bytes()[abs_start - 1]);
            let after_ok = abs_end >= lower.len() || !is_word_char(lower.as_bytes()[abs_end]);
            if before_ok && after_ok {
                spans.push((abs_start, abs_end));
            }
            start = abs_start + kw.len().max(1);
        }
    }
    spans.sort_unstable();
    merge_overlapping(spans)
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn merge_overlapping(spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for (s, e) in spans {
        if let Some(last) = merged.last_mut() {
            if s <= last.1 {
                last.1 = last.1.max(e);
                continue;
            }
        }
        merged.push((s, e));
    }
    merged
}

fn redact_spans(text: &str, spans: &[(usize, usize)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for &(s, e) in spans {
        out.push_str(&text[last..s]);
        out.push_str("[REDACTED]");
        last = e;
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn policy() -> PrivacyPolicy {
        PrivacyPolicy {
            blocked_apps: vec!["1password".to_string()],
            blocked_urls: vec!["bank.example.com".to_string()],
            blocked_keywords: vec!["secret".to_string()],
            quiet_hours: Some((
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            )),
        }
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    #[test]
    fn drops_blocked_app_window_capture() {
        let capture = NewCapture::new(Source::Window).with_meta("app_class", "1Password");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Drop => {}
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn drops_blocked_url() {
        let capture = NewCapture::new(Source::Window).with_meta("url", "https://bank.example.com/login");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Drop => {}
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn drops_clipboard_with_keyword() {
        let capture = NewCapture::new(Source::Clipboard).with_text("here is the secret code");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Drop => {}
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn redacts_screen_ocr_keyword() {
        let capture = NewCapture::new(Source::Screen).with_text("visible secret text on screen");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Accept(c) => {
                assert_eq!(c.text_data.as_deref(), Some("visible [REDACTED] text on screen"));
            }
            FilterDecision::Drop => panic!("expected redact, not drop"),
        }
    }

    #[test]
    fn keyword_match_is_word_boundary_aware() {
        // "secretary" should not match keyword "secret"
        let capture = NewCapture::new(Source::Screen).with_text("ask the secretary for help");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Accept(c) => {
                assert_eq!(c.text_data.as_deref(), Some("ask the secretary for help"));
            }
            FilterDecision::Drop => panic!("word boundary should have prevented a match"),
        }
    }

    #[test]
    fn drops_screen_and_clipboard_in_quiet_hours() {
        let late = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let capture = NewCapture::new(Source::Screen);
        match apply(capture, &policy(), late) {
            FilterDecision::Drop => {}
            _ => panic!("expected drop during quiet hours"),
        }
    }

    #[test]
    fn passes_through_other_sources_in_quiet_hours() {
        let late = NaiveTime::from_hms_opt(23, 0, 0).unwrap();
        let capture = NewCapture::new(Source::Git);
        match apply(capture, &policy(), late) {
            FilterDecision::Accept(_) => {}
            FilterDecision::Drop => panic!("git captures are not subject to quiet hours"),
        }
    }

    #[test]
    fn accepts_unmatched_capture_unchanged() {
        let capture = NewCapture::new(Source::Window).with_meta("app_class", "vscode");
        match apply(capture, &policy(), noon()) {
            FilterDecision::Accept(c) => assert_eq!(c.metadata.get("app_class").unwrap(), "vscode"),
            FilterDecision::Drop => panic!("expected accept"),
        }
    }
}
