use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Strictly increasing timestamps at microsecond precision.
///
/// Two writes in the same microsecond still get distinct, ordered stamps,
/// and stamps survive a round trip through storage unchanged.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    last: Option<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Never issue a stamp at or before `at`.
    pub fn advance_past(&mut self, at: DateTime<Utc>) {
        if self.last.map_or(true, |last| at > last) {
            self.last = Some(at);
        }
    }

    pub fn next(&mut self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let stamp = match self.last {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last = Some(stamp);
        stamp
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
