use chrono::{DateTime, Datelike, Duration, Local, Utc};

/// Resolution of a natural-language question's time scope, per `spec.md`
/// §4.6. Unmatched questions default to "recent 100 captures, no bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Bounded { start: DateTime<Utc>, end: DateTime<Utc> },
    Unbounded,
}

/// Deterministic keyword matcher over the lowercased question. Checked in
/// order of specificity so e.g. "yesterday morning" resolves to yesterday's
/// bounds rather than falling through to "this morning".
pub fn parse_time_range(question: &str) -> TimeRange {
    let q = question.to_lowercase();
    let now = Local::now();
    let today_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap();

    let bounded = |start: chrono::NaiveDateTime, end: chrono::NaiveDateTime| TimeRange::Bounded {
        start: start.and_local_timezone(Local).unwrap().with_timezone(&Utc),
        end: end.and_local_timezone(Local).unwrap().with_timezone(&Utc),
    };

    if q.contains("yesterday") {
        let start = today_start - Duration::days(1);
        return bounded(start, today_start);
    }
    if q.contains("last hour") {
        let end = now.naive_local();
        let start = end - Duration::hours(1);
        return bounded(start, end);
    }
    if q.contains("this morning") {
        let start = today_start;
        let end = today_start + Duration::hours(12);
        return bounded(start, end.min(now.naive_local()));
    }
    if q.contains("this afternoon") {
        let start = today_start + Duration::hours(12);
        let end = today_start + Duration::hours(18);
        return bounded(start, end.max(start).min(now.naive_local().max(start)));
    }
    if q.contains("this week") {
        let weekday = now.date_naive().weekday().num_days_from_monday() as i64;
        let start = today_start - Duration::days(weekday);
        return bounded(start, now.naive_local());
    }
    if q.contains("today") {
        return bounded(today_start, now.naive_local());
    }

    TimeRange::Unbounded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn today_resolves_to_midnight_through_now() {
        match parse_time_range("what did I do today?") {
            TimeRange::Bounded { start, end } => {
                assert!(start <= end);
            }
            TimeRange::Unbounded => panic!("expected bounded range"),
        }
    }

    #[test]
    fn unmatched_question_is_unbounded() {
        assert_eq!(parse_time_range("what is the meaning of life"), TimeRange::Unbounded);
    }

    #[test]
    fn yesterday_takes_priority_over_today() {
        match parse_time_range("what did I do yesterday afternoon") {
            TimeRange::Bounded { start, end } => {
                let today_midnight_utc = Local::now()
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_local_timezone(Local)
                    .unwrap()
                    .with_timezone(&Utc);
                assert!(end <= today_midnight_utc);
                assert!(start < end);
            }
            TimeRange::Unbounded => panic!("expected bounded range"),
        }
    }
}
