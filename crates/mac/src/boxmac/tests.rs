use std::time::Duration;

use bytes::Bytes;
use wsn_core::{CcaResult, RadioState, TimerService};

use super::*;
use crate::host::SendOutcome;
use crate::testing::{fire_next, fire_until, MockHost};
use crate::{FrameKind, MacError};

const A: NodeId = 1;
const B: NodeId = 2;
const C: NodeId = 3;

fn config() -> BoxMacConfig {
    BoxMacConfig {
        max_cca_checks: 3,
        sleep_time: Duration::from_millis(20),
        lpl_wake_interval_send_padding: Duration::from_millis(5),
        ..BoxMacConfig::for_node(A)
    }
}

fn payload() -> Bytes {
    Bytes::from_static(b"reading")
}

fn data(source: NodeId, destination: Destination, sequence_number: u32) -> MacFrame {
    let mut frame = MacFrame::data(source, destination, payload(), 448);
    frame.sequence_number = sequence_number;
    frame
}

fn run_until_state(mac: &mut BoxMac, host: &mut MockHost<BoxMacTimer>, state: &str) {
    for _ in 0..256 {
        if mac.state_name() == state {
            return;
        }
        fire_next(mac, host);
    }
    panic!("never reached state {}", state);
}

/// Startup through a clear CCA round into the first sleep period.
fn asleep() -> (BoxMac, MockHost<BoxMacTimer>) {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    run_until_state(&mut mac, &mut host, "Sleeping");
    (mac, host)
}

/// Startup with a busy channel, leaving the MAC in its listen period.
fn listening() -> (BoxMac, MockHost<BoxMacTimer>) {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    host.cca_script.extend([CcaResult::Busy, CcaResult::Busy]);
    mac.startup(&mut host).unwrap();
    run_until_state(&mut mac, &mut host, "Listening");
    (mac, host)
}

/// Fires timers until the upper layer has been told how a send went.
fn run_until_result(mac: &mut BoxMac, host: &mut MockHost<BoxMacTimer>) {
    for _ in 0..1000 {
        if !host.results.is_empty() {
            return;
        }
        fire_next(mac, host);
    }
    panic!("send never completed");
}

#[test]
fn test_startup_polls_then_sleeps_on_clear_channel() {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();

    assert_eq!(mac.state_name(), "PollingCca");
    assert_eq!(host.radio_state(), Some(RadioState::Rx));
    assert!(host.is_timer_running(BoxMacTimer::CcaRxTransition));

    fire_next(&mut mac, &mut host);
    fire_next(&mut mac, &mut host);
    assert_eq!(mac.state_name(), "PollingCca");
    assert_eq!(fire_next(&mut mac, &mut host), BoxMacTimer::CcaPollDelay);

    assert_eq!(mac.state_name(), "Sleeping");
    assert_eq!(host.radio_state(), Some(RadioState::Sleep));
    assert!(host.is_timer_running(BoxMacTimer::LplSleep));
    assert_eq!(host.stats.counter("BoxMac CCA clear"), 1);
}

#[test]
fn test_invalid_cca_samples_are_not_polls() {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    host.cca_script.push_back(CcaResult::NotValidYet);
    mac.startup(&mut host).unwrap();

    for _ in 0..3 {
        fire_next(&mut mac, &mut host);
    }
    assert_eq!(mac.state_name(), "PollingCca");
    fire_next(&mut mac, &mut host);
    assert_eq!(mac.state_name(), "Sleeping");
}

#[test]
fn test_sleep_timer_wakes_into_polling() {
    let (mut mac, mut host) = asleep();
    assert_eq!(fire_next(&mut mac, &mut host), BoxMacTimer::LplSleep);

    assert_eq!(mac.state_name(), "PollingCca");
    let slept = host.stats.summary("BoxMac Total sleep duration").unwrap();
    assert_eq!(slept.count, 1);
    assert!((slept.total - 0.020).abs() < 1e-9);
}

#[test]
fn test_busy_channel_listens_then_counts_idle_listening() {
    let (mut mac, mut host) = listening();
    assert!(host.is_timer_running(BoxMacTimer::ListenPeriod));
    assert_eq!(host.stats.counter("BoxMac CCA busy"), 1);

    fire_until(&mut mac, &mut host, BoxMacTimer::ListenPeriod);
    assert_eq!(host.stats.counter("BoxMac Idle listening"), 1);
    assert_eq!(mac.state_name(), "Sleeping");
}

#[test]
fn test_data_for_us_is_always_acked_and_delivered_once() {
    let (mut mac, mut host) = listening();
    let frame = data(B, Destination::Node(A), 5);

    mac.on_frame(&mut host, frame.clone()).unwrap();
    mac.on_frame(&mut host, frame).unwrap();

    assert_eq!(host.transmitted.len(), 2);
    for ack in &host.transmitted {
        assert_eq!(ack.kind, FrameKind::Ack);
        assert_eq!(ack.destination, Destination::Node(B));
    }
    assert_ne!(host.transmitted[0].sequence_number, host.transmitted[1].sequence_number);
    assert_eq!(host.delivered.len(), 1);
    assert_eq!(host.stats.counter("BoxMac Received data"), 2);
    assert_eq!(host.stats.counter("BoxMac Sent ACK"), 2);

    fire_until(&mut mac, &mut host, BoxMacTimer::ListenPeriod);
    assert_eq!(host.stats.counter("BoxMac Idle listening"), 0);
}

#[test]
fn test_broadcast_and_overheard_frames_are_deduplicated() {
    let (mut mac, mut host) = listening();

    mac.on_frame(&mut host, data(B, Destination::Broadcast, 3)).unwrap();
    mac.on_frame(&mut host, data(B, Destination::Broadcast, 3)).unwrap();
    mac.on_frame(&mut host, data(C, Destination::Node(B), 9)).unwrap();
    mac.on_frame(&mut host, data(C, Destination::Node(B), 9)).unwrap();
    mac.on_frame(&mut host, MacFrame::ack(B, C, 4, 88)).unwrap();

    assert_eq!(host.delivered.len(), 2);
    assert_eq!(host.stats.counter("BoxMac Received broadcast"), 1);
    assert_eq!(host.stats.counter("BoxMac Overheard"), 1);
    assert!(host.transmitted.is_empty());
}

#[test]
fn test_frames_are_ignored_while_asleep() {
    let (mut mac, mut host) = asleep();
    mac.on_frame(&mut host, data(B, Destination::Node(A), 1)).unwrap();

    assert!(host.delivered.is_empty());
    assert!(host.transmitted.is_empty());
}

#[test]
fn test_ricer_beacon_is_a_violation() {
    let (mut mac, mut host) = listening();
    let result = mac.on_frame(&mut host, MacFrame::rtr_beacon(B, 120));
    assert!(matches!(result, Err(MacError::ProtocolViolation { .. })));
}

#[test]
fn test_unicast_train_ends_on_ack_and_sleep_resumes() {
    let (mut mac, mut host) = asleep();
    let sleep_left = host.timer_remaining(BoxMacTimer::LplSleep).unwrap();

    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(B)).unwrap(), Admission::Queued);
    assert_eq!(mac.state_name(), "WaitingForSenderFromSleep");
    assert!(host.is_timer_paused(BoxMacTimer::LplSleep));
    assert_eq!(host.stats.counter("BoxMac Sent unicast"), 1);

    fire_until(&mut mac, &mut host, BoxMacTimer::SenderBackoff);
    assert_eq!(host.transmitted.len(), 1);
    assert_eq!(host.transmitted[0].kind, FrameKind::Data);
    assert_eq!(host.transmitted[0].destination, Destination::Node(B));

    mac.on_frame(&mut host, MacFrame::ack(B, A, 0, 88)).unwrap();

    assert_eq!(host.results, vec![(B, SendOutcome::Acked)]);
    assert_eq!(mac.buffered(), 0);
    assert_eq!(mac.state_name(), "Sleeping");
    assert_eq!(host.radio_state(), Some(RadioState::Sleep));
    assert_eq!(host.timer_remaining(BoxMacTimer::LplSleep).unwrap(), sleep_left);
    assert!(!host.is_timer_running(BoxMacTimer::SenderLplWakeInterval));
    assert_eq!(host.stats.summary("BoxMac Messages in unicast train").unwrap().total, 1.0);
}

#[test]
fn test_unacked_unicast_train_reports_failure() {
    let (mut mac, mut host) = asleep();
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();

    run_until_result(&mut mac, &mut host);

    assert_eq!(host.results, vec![(B, SendOutcome::Failed)]);
    assert!(host.transmitted.len() > 1);
    let first = host.transmitted[0].sequence_number;
    assert!(host.transmitted.iter().all(|frame| frame.sequence_number == first));
    assert_eq!(host.stats.counter("BoxMac Msg not acked"), 1);
    let train = host.stats.summary("BoxMac Message train duration").unwrap();
    assert!(train.total >= config().train_duration().as_secs_f64());
    assert_eq!(mac.state_name(), "Sleeping");
    assert_eq!(mac.buffered(), 0);
}

#[test]
fn test_broadcast_train_repeats_without_reporting() {
    let (mut mac, mut host) = asleep();
    mac.submit(&mut host, payload(), Destination::Broadcast).unwrap();

    run_until_state(&mut mac, &mut host, "Sleeping");

    assert!(host.transmitted.len() > 1);
    assert!(host.transmitted.iter().all(|frame| frame.destination.is_broadcast()));
    assert!(host.results.is_empty());
    assert_eq!(host.stats.counter("BoxMac Sent broadcast"), 1);
    assert_eq!(mac.buffered(), 0);
}

#[test]
fn test_busy_channel_during_train_backs_off() {
    let (mut mac, mut host) = asleep();
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    host.cca_script.push_back(CcaResult::Busy);

    fire_until(&mut mac, &mut host, BoxMacTimer::SenderBackoff);
    assert!(host.transmitted.is_empty());
    assert_eq!(host.stats.counter("BoxMac Backoff congestion"), 1);

    fire_until(&mut mac, &mut host, BoxMacTimer::SenderBackoff);
    assert_eq!(host.transmitted.len(), 1);
}

#[test]
fn test_packets_wait_for_the_channel_check() {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();

    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    assert_eq!(mac.state_name(), "PollingCca");
    assert_eq!(mac.buffered(), 1);
    assert!(!host.is_timer_running(BoxMacTimer::SenderBackoff));

    run_until_state(&mut mac, &mut host, "WaitingForSender");
    assert!(host.is_timer_running(BoxMacTimer::SenderBackoff));
}

#[test]
fn test_overflow_drops_packet() {
    let mut mac = BoxMac::new(
        BoxMacConfig {
            max_message_buffer_size: 1,
            ..config()
        },
        1,
    );
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();

    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(B)).unwrap(), Admission::Queued);
    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(C)).unwrap(), Admission::Overflow);
    assert_eq!(mac.buffered(), 1);
    assert_eq!(host.stats.counter("BoxMac buffer overflow"), 1);
}

#[test]
fn test_illegal_transition_is_fatal() {
    let mut mac = BoxMac::new(config(), 1);
    let result = mac.change_state(BoxMacState::Listening);
    assert!(matches!(
        result,
        Err(MacError::IllegalTransition { from: "Startup", to: "Listening" })
    ));
}

#[test]
fn test_cca_restart_while_polling_is_fatal() {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    assert!(mac.cca.start(&mut host, &mac.config).is_err());
}

#[test]
fn test_reset_epoch_keeps_sequence_numbers() {
    let (mut mac, mut host) = asleep();
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    fire_until(&mut mac, &mut host, BoxMacTimer::SenderBackoff);
    let before = host.transmitted[0].sequence_number;

    mac.reset_epoch(&mut host);
    assert_eq!(mac.state_name(), "Startup");
    assert_eq!(mac.buffered(), 0);
    assert!(host.timers.running().is_empty());
    assert!(!host.is_timer_paused(BoxMacTimer::LplSleep));

    mac.startup(&mut host).unwrap();
    run_until_state(&mut mac, &mut host, "Sleeping");
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    fire_until(&mut mac, &mut host, BoxMacTimer::SenderBackoff);
    let after = host.transmitted.last().unwrap().sequence_number;
    assert!(after > before);
}

#[test]
fn test_finish_records_leftovers() {
    let mut mac = BoxMac::new(config(), 1);
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();

    mac.finish(&mut host);
    assert_eq!(host.stats.summary("BoxMac packets left in buffer").unwrap().total, 1.0);
    assert_eq!(mac.buffered(), 0);
}
