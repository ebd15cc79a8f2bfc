//! Update scheduling and stream fallback policy
//!
//! A pure state machine deciding, at any instant, whether the bridge should
//! open a stream, run a poll cycle, or wait. It holds no sockets and does no
//! IO; the orchestrator feeds it connection outcomes and clock readings and
//! executes whatever it decides. That keeps every transition unit-testable
//! with a fabricated clock.
//!
//! Policy: prefer the stream. On repeated connect failures fall back to
//! interval polling, and from fallback periodically retry the stream. A
//! forced refresh runs on its own interval even while the stream looks
//! healthy: it reopens the stream, since a half-open socket delivers no
//! close frame and would otherwise go unnoticed forever. Every successful
//! connect is followed by one immediate poll so the new connection starts
//! from a full snapshot instead of waiting for its first frame. At most one update
//! cycle runs at a time; triggers arriving mid-cycle are dropped, not
//! queued, because the next cycle reads fresher data anyway.

use std::time::{Duration, Instant};

/// Where the scheduler currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No connection and no decision yet
    Disconnected,
    /// A stream connect attempt is in flight
    ConnectingStream,
    /// Stream delivering frames
    StreamActive,
    /// Stream given up on for now, polling on an interval
    PollingFallback,
}

/// What the orchestrator should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Open a stream connection tagged with this generation
    ConnectStream { generation: u64 },
    /// Run a full fetch-and-apply cycle
    Poll,
    /// Nothing due before this deadline
    Wait(Duration),
}

/// Timing knobs, normally taken from [`crate::config::UpdatesConfig`]
#[derive(Debug, Clone, Copy)]
pub struct SchedulerPolicy {
    pub streaming: bool,
    pub poll_interval: Duration,
    pub stream_retry_limit: u32,
    pub forced_refresh: Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            streaming: true,
            poll_interval: Duration::from_secs(60),
            stream_retry_limit: 3,
            forced_refresh: Duration::from_secs(60),
        }
    }
}

pub struct Scheduler {
    policy: SchedulerPolicy,
    state: SchedulerState,
    /// Consecutive failed stream connects since the last success
    retries: u32,
    /// Monotonic connection counter, tags stream events
    generation: u64,
    last_refresh: Option<Instant>,
    last_poll: Option<Instant>,
    cycle_in_flight: bool,
    /// In fallback, retry the stream on the next due interval instead of
    /// polling again. Set after each fallback poll so the two alternate.
    retry_stream_next: bool,
    /// Run one full poll as soon as a stream connects, so the connection
    /// is seeded with state even if it stays silent.
    poll_on_connect: bool,
}

impl Scheduler {
    pub fn new(policy: SchedulerPolicy) -> Self {
        Self {
            policy,
            state: SchedulerState::Disconnected,
            retries: 0,
            generation: 0,
            last_refresh: None,
            last_poll: None,
            cycle_in_flight: false,
            retry_stream_next: false,
            poll_on_connect: false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// The generation of the most recent connect attempt. Events tagged
    /// with anything older belong to a superseded connection.
    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// Decide the next action as of `now`.
    pub fn next_action(&mut self, now: Instant) -> SchedulerAction {
        match self.state {
            SchedulerState::Disconnected => {
                if self.policy.streaming {
                    self.state = SchedulerState::ConnectingStream;
                    self.generation += 1;
                    SchedulerAction::ConnectStream {
                        generation: self.generation,
                    }
                } else {
                    self.state = SchedulerState::PollingFallback;
                    SchedulerAction::Poll
                }
            }
            SchedulerState::ConnectingStream => {
                // Waiting on the connect attempt; outcome arrives via
                // stream_connected or stream_failed.
                SchedulerAction::Wait(Duration::from_millis(250))
            }
            SchedulerState::StreamActive => {
                if self.poll_on_connect {
                    self.poll_on_connect = false;
                    SchedulerAction::Poll
                } else if self.refresh_due(now) {
                    // A stream that died without a close frame still looks
                    // active here, so the forced refresh reopens it rather
                    // than trusting keep-alive alone.
                    self.state = SchedulerState::ConnectingStream;
                    self.generation += 1;
                    SchedulerAction::ConnectStream {
                        generation: self.generation,
                    }
                } else {
                    SchedulerAction::Wait(self.time_until_refresh(now))
                }
            }
            SchedulerState::PollingFallback => {
                let poll_due = match self.last_poll {
                    Some(last) => now.duration_since(last) >= self.policy.poll_interval,
                    None => true,
                };
                if poll_due {
                    // Fallback alternates: poll first so data keeps
                    // flowing, then use the next interval to try getting
                    // the stream back.
                    if self.policy.streaming && self.retry_stream_next {
                        self.retries = 0;
                        self.retry_stream_next = false;
                        self.state = SchedulerState::ConnectingStream;
                        self.generation += 1;
                        return SchedulerAction::ConnectStream {
                            generation: self.generation,
                        };
                    }
                    self.retry_stream_next = true;
                    SchedulerAction::Poll
                } else {
                    let last = match self.last_poll {
                        Some(last) => last,
                        None => now,
                    };
                    let elapsed = now.duration_since(last);
                    SchedulerAction::Wait(
                        self.policy.poll_interval.saturating_sub(elapsed),
                    )
                }
            }
        }
    }

    /// The stream connect attempt succeeded. The next action is one full
    /// poll, so the fresh connection never sits dataless waiting on its
    /// first frame.
    pub fn stream_connected(&mut self) {
        self.retries = 0;
        self.state = SchedulerState::StreamActive;
        self.poll_on_connect = true;
    }

    /// The stream connect attempt failed or timed out. Past the retry
    /// limit the scheduler stops trying and falls back to polling.
    pub fn stream_failed(&mut self) {
        self.retries += 1;
        if self.retries >= self.policy.stream_retry_limit {
            self.state = SchedulerState::PollingFallback;
        } else {
            self.state = SchedulerState::Disconnected;
        }
    }

    /// An established stream closed.
    pub fn stream_closed(&mut self) {
        if self.state == SchedulerState::StreamActive {
            self.state = SchedulerState::Disconnected;
        }
    }

    /// Refresh attempts are paced by the most recent cycle, successful or
    /// not, so a failing endpoint is retried on the interval rather than
    /// hammered.
    fn last_attempt(&self) -> Option<Instant> {
        self.last_refresh.max(self.last_poll)
    }

    fn refresh_due(&self, now: Instant) -> bool {
        match self.last_attempt() {
            Some(last) => now.duration_since(last) >= self.policy.forced_refresh,
            None => true,
        }
    }

    fn time_until_refresh(&self, now: Instant) -> Duration {
        match self.last_attempt() {
            Some(last) => self
                .policy
                .forced_refresh
                .saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Claim the single in-flight cycle slot. Returns false when a cycle
    /// is already running; the trigger is then dropped.
    pub fn begin_cycle(&mut self) -> bool {
        if self.cycle_in_flight {
            return false;
        }
        self.cycle_in_flight = true;
        true
    }

    /// Release the cycle slot and record the poll timestamps.
    pub fn finish_cycle(&mut self, now: Instant, was_full_refresh: bool) {
        self.cycle_in_flight = false;
        self.last_poll = Some(now);
        if was_full_refresh {
            self.last_refresh = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> SchedulerPolicy {
        SchedulerPolicy::default()
    }

    #[test]
    fn prefers_stream_when_enabled() {
        let mut s = Scheduler::new(policy());
        let now = Instant::now();
        assert_eq!(
            s.next_action(now),
            SchedulerAction::ConnectStream { generation: 1 }
        );
        assert_eq!(s.state(), SchedulerState::ConnectingStream);
    }

    #[test]
    fn polls_when_streaming_disabled() {
        let mut s = Scheduler::new(SchedulerPolicy {
            streaming: false,
            ..policy()
        });
        assert_eq!(s.next_action(Instant::now()), SchedulerAction::Poll);
        assert_eq!(s.state(), SchedulerState::PollingFallback);
    }

    #[test]
    fn falls_back_after_retry_limit() {
        let mut s = Scheduler::new(policy());
        let now = Instant::now();

        for attempt in 1..=3u64 {
            assert_eq!(
                s.next_action(now),
                SchedulerAction::ConnectStream { generation: attempt }
            );
            s.stream_failed();
        }
        assert_eq!(s.state(), SchedulerState::PollingFallback);
        // Fallback polls first, retries the stream on the interval after
        assert_eq!(s.next_action(now), SchedulerAction::Poll);
        assert!(s.begin_cycle());
        s.finish_cycle(now, true);
        let later = now + Duration::from_secs(61);
        assert_eq!(
            s.next_action(later),
            SchedulerAction::ConnectStream { generation: 4 }
        );
    }

    #[test]
    fn fallback_polls_on_interval_when_streaming_disabled() {
        let mut s = Scheduler::new(SchedulerPolicy {
            streaming: false,
            poll_interval: Duration::from_secs(60),
            ..policy()
        });
        let start = Instant::now();
        assert_eq!(s.next_action(start), SchedulerAction::Poll);
        assert!(s.begin_cycle());
        s.finish_cycle(start, true);

        // Not due again right away
        match s.next_action(start + Duration::from_secs(1)) {
            SchedulerAction::Wait(d) => assert!(d <= Duration::from_secs(59)),
            other => panic!("expected Wait, got {other:?}"),
        }
        assert_eq!(
            s.next_action(start + Duration::from_secs(61)),
            SchedulerAction::Poll
        );
    }

    #[test]
    fn forced_refresh_reopens_stream() {
        let mut s = Scheduler::new(policy());
        let start = Instant::now();
        s.next_action(start);
        s.stream_connected();
        assert_eq!(s.state(), SchedulerState::StreamActive);

        // A fresh connection is seeded by one immediate poll
        assert_eq!(s.next_action(start), SchedulerAction::Poll);
        assert!(s.begin_cycle());
        s.finish_cycle(start, true);

        match s.next_action(start + Duration::from_secs(30)) {
            SchedulerAction::Wait(_) => {}
            other => panic!("expected Wait, got {other:?}"),
        }
        // On the refresh interval the stream is reopened, not just polled
        assert_eq!(
            s.next_action(start + Duration::from_secs(61)),
            SchedulerAction::ConnectStream { generation: 2 }
        );
        assert_eq!(s.state(), SchedulerState::ConnectingStream);
    }

    #[test]
    fn forced_refresh_advances_generation_every_interval() {
        // A silently dead socket never reports a close, so each refresh
        // interval must supersede the connection with a new generation.
        let mut s = Scheduler::new(policy());
        let mut now = Instant::now();

        assert_eq!(
            s.next_action(now),
            SchedulerAction::ConnectStream { generation: 1 }
        );
        s.stream_connected();
        for expected_gen in 2..=12u64 {
            assert_eq!(s.next_action(now), SchedulerAction::Poll);
            assert!(s.begin_cycle());
            s.finish_cycle(now, true);

            now += Duration::from_secs(61);
            assert_eq!(
                s.next_action(now),
                SchedulerAction::ConnectStream {
                    generation: expected_gen
                }
            );
            s.stream_connected();
        }
        assert_eq!(s.current_generation(), 12);
    }

    #[test]
    fn connect_is_followed_by_immediate_poll() {
        let mut s = Scheduler::new(policy());
        let start = Instant::now();
        s.next_action(start);
        s.stream_connected();
        assert_eq!(s.next_action(start), SchedulerAction::Poll);
        assert!(s.begin_cycle());
        s.finish_cycle(start, true);

        // Reconnect shortly after a refresh: the post-connect poll fires
        // even though the refresh interval has not elapsed, so a silent
        // new connection never sits dataless.
        s.stream_closed();
        let later = start + Duration::from_secs(10);
        assert_eq!(
            s.next_action(later),
            SchedulerAction::ConnectStream { generation: 2 }
        );
        s.stream_connected();
        assert_eq!(s.next_action(later), SchedulerAction::Poll);
    }

    #[test]
    fn failed_refresh_is_retried_on_interval() {
        let mut s = Scheduler::new(policy());
        let start = Instant::now();
        s.next_action(start);
        s.stream_connected();
        assert_eq!(s.next_action(start), SchedulerAction::Poll);
        assert!(s.begin_cycle());
        // Fetch failed, no refresh applied
        s.finish_cycle(start, false);

        // Not retried immediately
        match s.next_action(start + Duration::from_secs(1)) {
            SchedulerAction::Wait(_) => {}
            other => panic!("expected Wait, got {other:?}"),
        }
        assert_eq!(
            s.next_action(start + Duration::from_secs(61)),
            SchedulerAction::ConnectStream { generation: 2 }
        );
    }

    #[test]
    fn in_flight_cycle_drops_second_trigger() {
        let mut s = Scheduler::new(policy());
        assert!(s.begin_cycle());
        assert!(!s.begin_cycle());
        s.finish_cycle(Instant::now(), false);
        assert!(s.begin_cycle());
    }

    #[test]
    fn stream_close_triggers_reconnect() {
        let mut s = Scheduler::new(policy());
        let now = Instant::now();
        s.next_action(now);
        s.stream_connected();
        s.stream_closed();
        assert_eq!(s.state(), SchedulerState::Disconnected);
        assert_eq!(
            s.next_action(now),
            SchedulerAction::ConnectStream { generation: 2 }
        );
    }

    #[test]
    fn success_resets_retry_budget() {
        let mut s = Scheduler::new(policy());
        let now = Instant::now();
        s.next_action(now);
        s.stream_failed();
        s.stream_failed();
        s.next_action(now);
        s.stream_connected();
        // A later close starts retries from zero again
        s.stream_closed();
        s.next_action(now);
        s.stream_failed();
        assert_eq!(s.state(), SchedulerState::Disconnected);
    }
}
