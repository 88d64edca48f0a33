//! recording host used by the MAC unit tests

use std::collections::VecDeque;
use std::time::Duration;

use wsn_core::{
    CcaResult, NodeId, Radio, RadioState, Stats, StatsSink, TimerBank, TimerError, TimerKind, TimerService,
};

use crate::host::{MacHost, MacProtocol, SendOutcome, UpperLayer};
use crate::MacFrame;

pub struct MockHost<K: TimerKind> {
    pub timers: TimerBank<K>,
    pub radio: Vec<RadioState>,
    pub cca_script: VecDeque<CcaResult>,
    pub cca_default: CcaResult,
    pub transmitted: Vec<MacFrame>,
    pub delivered: Vec<MacFrame>,
    pub results: Vec<(NodeId, SendOutcome)>,
    pub stats: Stats,
}

impl<K: TimerKind> MockHost<K> {
    pub fn new() -> Self {
        Self {
            timers: TimerBank::new(),
            radio: Vec::new(),
            cca_script: VecDeque::new(),
            cca_default: CcaResult::Clear,
            transmitted: Vec::new(),
            delivered: Vec::new(),
            results: Vec::new(),
            stats: Stats::new(),
        }
    }

    pub fn radio_state(&self) -> Option<RadioState> {
        self.radio.last().copied()
    }

    pub fn advance(&mut self, by: Duration) {
        let now = self.timers.now() + by;
        self.timers.advance_to(now);
    }
}

/// Fires the earliest pending timer into `mac` and returns its kind.
pub fn fire_next<M: MacProtocol>(mac: &mut M, host: &mut MockHost<M::Timer>) -> M::Timer {
    let timer = host.timers.advance_to_next().expect("no timer pending");
    mac.on_timer(host, timer).expect("timer handler failed");
    timer
}

/// Fires timers until `wanted` has fired, asserting it eventually does.
pub fn fire_until<M: MacProtocol>(mac: &mut M, host: &mut MockHost<M::Timer>, wanted: M::Timer) {
    for _ in 0..64 {
        if fire_next(mac, host) == wanted {
            return;
        }
    }
    panic!("timer {:?} never fired", wanted);
}

impl<K: TimerKind> Radio for MockHost<K> {
    fn set_radio_state(&mut self, state: RadioState) {
        self.radio.push(state);
    }

    fn sample_cca(&mut self) -> CcaResult {
        self.cca_script.pop_front().unwrap_or(self.cca_default)
    }
}

impl<K: TimerKind> TimerService<K> for MockHost<K> {
    fn start_timer(&mut self, kind: K, after: Duration) -> Result<(), TimerError> {
        self.timers.start_timer(kind, after)
    }

    fn stop_timer(&mut self, kind: K) {
        self.timers.stop_timer(kind)
    }

    fn is_timer_running(&self, kind: K) -> bool {
        self.timers.is_timer_running(kind)
    }

    fn timer_remaining(&self, kind: K) -> Result<Duration, TimerError> {
        self.timers.timer_remaining(kind)
    }

    fn pause_timer(&mut self, kind: K) -> Result<(), TimerError> {
        self.timers.pause_timer(kind)
    }

    fn resume_timer(&mut self, kind: K) -> Result<(), TimerError> {
        self.timers.resume_timer(kind)
    }

    fn is_timer_paused(&self, kind: K) -> bool {
        self.timers.is_timer_paused(kind)
    }

    fn cancel_all_timers(&mut self) {
        self.timers.cancel_all_timers()
    }
}

impl<K: TimerKind> UpperLayer for MockHost<K> {
    fn deliver(&mut self, frame: MacFrame) {
        self.delivered.push(frame);
    }

    fn report_send_result(&mut self, neighbor: NodeId, outcome: SendOutcome) {
        self.results.push((neighbor, outcome));
    }
}

impl<K: TimerKind> StatsSink for MockHost<K> {
    fn count(&mut self, name: &str) {
        self.stats.count(name);
    }

    fn count_labelled(&mut self, name: &str, label: &str) {
        self.stats.count_labelled(name, label);
    }

    fn record(&mut self, name: &str, value: f64) {
        self.stats.record(name, value);
    }
}

impl<K: TimerKind> MacHost<K> for MockHost<K> {
    fn now(&self) -> Duration {
        self.timers.now()
    }

    fn transmit(&mut self, frame: MacFrame) {
        self.radio.push(RadioState::Tx);
        self.transmitted.push(frame);
    }
}
