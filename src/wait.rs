//! Poll-until-condition primitive shared by shutdown confirmation, start
//! confirmation and health-probe retries

use crate::clock::Clock;
use std::time::Duration;

/// How long a poll is allowed to keep trying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollLimit {
    /// Poll forever
    Unbounded,
    /// Give up once this much time has passed since the first check
    Deadline(Duration),
    /// Give up after this many checks
    Attempts(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub limit: PollLimit,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self { interval, limit: PollLimit::Unbounded }
    }

    pub fn deadline(interval: Duration, timeout: Duration) -> Self {
        Self { interval, limit: PollLimit::Deadline(timeout) }
    }

    pub fn attempts(interval: Duration, max: u32) -> Self {
        Self { interval, limit: PollLimit::Attempts(max) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

impl<T> PollOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts, .. } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }
}

/// Run `check` until it yields a value or the policy limit is hit.
///
/// `check` receives the 1-based attempt number. The first check happens
/// immediately; the interval is slept only between checks, never after the
/// final one. Under a deadline the last sleep is shortened so the final check
/// lands exactly on the deadline. Errors from `check` stop the poll and
/// propagate; a check that cannot fail can use `Infallible`.
pub fn poll_until<T, E, F>(
    clock: &dyn Clock,
    policy: &PollPolicy,
    mut check: F,
) -> std::result::Result<PollOutcome<T>, E>
where
    F: FnMut(u32) -> std::result::Result<Option<T>, E>,
{
    if policy.limit == PollLimit::Attempts(0) {
        return Ok(PollOutcome::Exhausted { attempts: 0 });
    }

    let started = clock.now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if let Some(value) = check(attempt)? {
            return Ok(PollOutcome::Ready { value, attempts: attempt });
        }

        let pause = match policy.limit {
            PollLimit::Unbounded => Some(policy.interval),
            PollLimit::Deadline(timeout) => {
                let remaining = timeout.saturating_sub(clock.now().duration_since(started));
                (!remaining.is_zero()).then(|| policy.interval.min(remaining))
            }
            PollLimit::Attempts(max) => (attempt < max).then_some(policy.interval),
        };

        match pause {
            Some(pause) => clock.sleep(pause),
            None => return Ok(PollOutcome::Exhausted { attempts: attempt }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::{Error, Result};
    use std::convert::Infallible;

    #[test]
    fn test_ready_on_first_check_does_not_sleep() {
        let clock = ManualClock::new();
        let policy = PollPolicy::attempts(Duration::from_secs(10), 3);

        let outcome = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(Some("up"))).unwrap();

        assert_eq!(outcome, PollOutcome::Ready { value: "up", attempts: 1 });
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_attempt_limit_sleeps_between_checks_only() {
        let clock = ManualClock::new();
        let policy = PollPolicy::attempts(Duration::from_secs(60), 3);

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(None)).unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 3 });
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60); 2]);
    }

    #[test]
    fn test_ready_on_nth_attempt() {
        let clock = ManualClock::new();
        let policy = PollPolicy::attempts(Duration::from_secs(1), 5);

        let outcome = poll_until(&clock, &policy, |n| Ok::<_, Infallible>((n == 4).then_some(n))).unwrap();

        assert_eq!(outcome, PollOutcome::Ready { value: 4, attempts: 4 });
    }

    #[test]
    fn test_deadline_expires() {
        let clock = ManualClock::new();
        let policy = PollPolicy::deadline(Duration::from_secs(5), Duration::from_secs(20));

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(None)).unwrap();

        // checks at t=0,5,10,15,20
        assert_eq!(outcome.attempts(), 5);
        assert!(!outcome.is_ready());
        assert_eq!(clock.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn test_unbounded_keeps_polling() {
        let clock = ManualClock::new();
        let policy = PollPolicy::unbounded(Duration::from_secs(2));

        let outcome = poll_until(&clock, &policy, |n| Ok::<_, Infallible>((n == 50).then_some(()))).unwrap();

        assert_eq!(outcome.attempts(), 50);
        assert_eq!(clock.elapsed(), Duration::from_secs(98));
    }

    #[test]
    fn test_check_error_propagates() {
        let clock = ManualClock::new();
        let policy = PollPolicy::unbounded(Duration::from_secs(1));

        let result: Result<PollOutcome<()>> =
            poll_until(&clock, &policy, |_| Err(Error::PowerShell("Get-VM failed".into())));

        assert!(matches!(result, Err(Error::PowerShell(_))));
    }

    #[test]
    fn test_zero_attempts_never_checks() {
        let clock = ManualClock::new();
        let policy = PollPolicy::attempts(Duration::from_secs(1), 0);
        let mut called = false;

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| {
            called = true;
            Ok::<_, Infallible>(None)
        })
        .unwrap();

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 0 });
        assert!(!called);
    }

    #[test]
    fn test_deadline_clamps_last_sleep() {
        let clock = ManualClock::new();
        let policy = PollPolicy::deadline(Duration::from_secs(4), Duration::from_secs(10));

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(None)).unwrap();

        // checks at t=0,4,8,10
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(4), Duration::from_secs(4), Duration::from_secs(2)]
        );
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_interval_longer_than_deadline() {
        let clock = ManualClock::new();
        let policy = PollPolicy::deadline(Duration::from_secs(60), Duration::from_secs(10));

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(None)).unwrap();

        assert_eq!(outcome.attempts(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(10)]);
    }

    #[test]
    fn test_zero_deadline_checks_once() {
        let clock = ManualClock::new();
        let policy = PollPolicy::deadline(Duration::from_secs(5), Duration::ZERO);

        let outcome: PollOutcome<()> = poll_until(&clock, &policy, |_| Ok::<_, Infallible>(None)).unwrap();

        assert_eq!(outcome.attempts(), 1);
        assert!(clock.sleeps().is_empty());
    }
}
