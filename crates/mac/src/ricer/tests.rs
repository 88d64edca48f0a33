use std::time::Duration;

use bytes::Bytes;
use wsn_core::{CcaResult, Destination, RadioState, TimerService};

use super::*;
use crate::testing::{fire_next, fire_until, MockHost};
use crate::FrameKind;

const A: NodeId = 1;
const B: NodeId = 2;
const C: NodeId = 3;

fn config() -> RicerConfig {
    RicerConfig {
        wake_for_receive_jitter: Duration::ZERO,
        ..RicerConfig::for_node(A)
    }
}

fn payload() -> Bytes {
    Bytes::from_static(b"reading")
}

fn rtr_from(node: NodeId) -> MacFrame {
    MacFrame::rtr_beacon(node, 120)
}

fn ack_from(node: NodeId, ack_for: NodeId) -> MacFrame {
    MacFrame::ack_rtr_beacon(node, ack_for, 136)
}

/// Runs startup through the first RTR and listen window into Sleep,
/// with the sleep transition already complete.
fn asleep(config: RicerConfig) -> (RicerMac, MockHost<MacTimer>) {
    let mut mac = RicerMac::new(config, 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_until(&mut mac, &mut host, MacTimer::ListenForData);
    assert_eq!(mac.state_name(), "Sleep");
    fire_until(&mut mac, &mut host, MacTimer::WaitForSleepTransition);
    assert_eq!(mac.state_name(), "Sleep");
    (mac, host)
}

#[test]
fn test_startup_initiates_receive() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();

    assert_eq!(mac.state_name(), "InitiateReceive");
    assert_eq!(host.radio_state(), Some(RadioState::Rx));
    assert!(host.is_timer_running(MacTimer::WaitForRadioRxTransition));

    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::WaitForRadioRxTransition);
    assert_eq!(mac.state_name(), "ListenForData");
    assert_eq!(host.transmitted.len(), 1);
    assert_eq!(host.transmitted[0].kind, FrameKind::RtrBeacon);
    assert_eq!(host.stats.counter("Ricer CCA clear for RTR"), 1);
}

#[test]
fn test_busy_channel_backs_off_before_rtr() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    host.cca_script.extend([CcaResult::Busy, CcaResult::NotValidYet, CcaResult::Clear]);
    mac.startup(&mut host).unwrap();

    fire_next(&mut mac, &mut host);
    assert!(host.is_timer_running(MacTimer::BackoffForCca));
    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::BackoffForCca);
    assert!(host.is_timer_running(MacTimer::WaitForTxComplete));
    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::WaitForTxComplete);
    assert_eq!(mac.state_name(), "ListenForData");
    assert_eq!(host.stats.counter("Ricer CCA busy for RTR"), 1);
}

#[test]
fn test_listen_acks_data_and_listens_again() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_next(&mut mac, &mut host);
    host.advance(Duration::from_millis(1));

    let data = MacFrame::data(B, Destination::Node(A), payload(), 384);
    mac.on_frame(&mut host, data).unwrap();

    assert_eq!(host.delivered.len(), 1);
    let ack = host.transmitted.last().unwrap();
    assert_eq!(ack.kind, FrameKind::AckRtrBeacon);
    assert_eq!(ack.ack_for, Some(B));
    assert_eq!(mac.state_name(), "ListenForData");
    assert_eq!(
        host.timer_remaining(MacTimer::ListenForData).unwrap(),
        mac.config().listen_for_data_dwell()
    );

    let overheard = MacFrame::data(C, Destination::Node(B), payload(), 384);
    mac.on_frame(&mut host, overheard).unwrap();
    assert_eq!(host.delivered.len(), 2);
    assert_eq!(host.stats.counter("Ricer overheard packet"), 1);
    assert_eq!(host.transmitted.len(), 2);
}

#[test]
fn test_listen_timeout_arms_wakeup_and_sleeps() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_until(&mut mac, &mut host, MacTimer::ListenForData);

    assert_eq!(mac.state_name(), "Sleep");
    assert_eq!(host.radio_state(), Some(RadioState::Sleep));
    assert_eq!(
        host.timer_remaining(MacTimer::WakeForReceive).unwrap(),
        mac.config().wake_for_receive_interval
    );
    assert_eq!(host.stats.counter("Ricer sent RTR but no data"), 1);

    fire_until(&mut mac, &mut host, MacTimer::WakeForReceive);
    assert_eq!(mac.state_name(), "InitiateReceive");
    assert_eq!(host.stats.counter("Ricer wakeup"), 1);
    assert_eq!(host.stats.summary("Ricer sleep time").unwrap().count, 1);
}

#[test]
fn test_overheard_data_while_settling_into_sleep() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_until(&mut mac, &mut host, MacTimer::ListenForData);
    assert!(host.is_timer_running(MacTimer::WaitForSleepTransition));
    let sent_before = host.transmitted.len();

    let overheard = MacFrame::data(C, Destination::Node(B), payload(), 384);
    mac.on_frame(&mut host, overheard).unwrap();

    assert_eq!(host.delivered.len(), 1);
    assert_eq!(host.transmitted.len(), sent_before);
    assert_eq!(host.stats.counter("Ricer overheard packet"), 1);
    assert_eq!(mac.state_name(), "Sleep");
    assert_eq!(host.radio_state(), Some(RadioState::Sleep));
}

#[test]
fn test_late_data_for_us_is_ignored_while_waiting_to_send() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    assert_eq!(mac.state_name(), "WaitToSend");
    let sent_before = host.transmitted.len();

    let late = MacFrame::data(C, Destination::Node(A), payload(), 384);
    mac.on_frame(&mut host, late).unwrap();

    assert!(host.delivered.is_empty());
    assert_eq!(host.transmitted.len(), sent_before);
    assert_eq!(mac.state_name(), "WaitToSend");
    assert!(host.is_timer_running(MacTimer::SendTimeout));
    assert_eq!(mac.buffer().len(), 1);
}

#[test]
fn test_unicast_delivered_on_rendezvous() {
    let (mut mac, mut host) = asleep(config());

    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(B)).unwrap(), Admission::Queued);
    assert_eq!(mac.state_name(), "WaitToSend");
    assert!(host.is_timer_running(MacTimer::SendTimeout));
    assert_eq!(host.radio_state(), Some(RadioState::Rx));
    assert_eq!(mac.buffer().next_for(B).unwrap().send_attempts, 1);

    mac.on_frame(&mut host, rtr_from(C)).unwrap();
    assert_eq!(mac.state_name(), "WaitToSend");

    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    assert_eq!(mac.state_name(), "Send");
    assert_eq!(mac.target(), Some(B));

    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::SendBackoff);
    let sent = host.transmitted.last().unwrap().clone();
    assert_eq!(sent.kind, FrameKind::Data);
    assert_eq!(sent.destination, Destination::Node(B));
    assert!(host.is_timer_running(MacTimer::WaitForAck));

    mac.on_frame(&mut host, ack_from(B, A)).unwrap();
    assert_eq!(host.results, vec![(B, SendOutcome::Acked)]);
    assert!(mac.buffer().is_empty());
    assert_eq!(mac.state_name(), "Sleep");
    assert!(!host.is_timer_running(MacTimer::SendTimeout));
    assert!(!host.is_timer_running(MacTimer::WaitForAck));
    assert_eq!(host.stats.counter("Ricer packet ACKed"), 1);
}

#[test]
fn test_busy_channel_until_timeout_reports_failure() {
    let (mut mac, mut host) = asleep(RicerConfig {
        max_send_retries: 1,
        ..config()
    });
    host.cca_default = CcaResult::Busy;

    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::SendBackoff);
    assert_eq!(mac.state_name(), "WaitToSend");
    assert_eq!(mac.target(), None);
    assert_eq!(host.stats.counter("Ricer CCA busy for data"), 1);

    // Wakeup lands inside the send window, deferring the RTR until we stop sending
    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::WakeForReceive);
    assert!(mac.needs_rtr());

    host.cca_default = CcaResult::Clear;
    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::SendTimeout);
    assert_eq!(host.results, vec![(B, SendOutcome::Failed)]);
    assert!(mac.buffer().is_empty());
    assert_eq!(host.stats.counter("Ricer dropped packet"), 1);
    assert_eq!(mac.state_name(), "InitiateReceive");
    assert!(!mac.needs_rtr());
}

#[test]
fn test_unicast_survives_until_attempt_limit() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();

    fire_until(&mut mac, &mut host, MacTimer::SendTimeout);
    assert!(host.results.is_empty());
    assert_eq!(mac.buffer().len(), 1);
}

#[test]
fn test_broadcast_served_once_per_neighbor() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Broadcast).unwrap();

    for neighbor in [B, C] {
        mac.on_frame(&mut host, rtr_from(neighbor)).unwrap();
        fire_next(&mut mac, &mut host);
        let sent = host.transmitted.last().unwrap();
        assert_eq!(sent.destination, Destination::Node(neighbor));
        assert!(sent.is_data_for_broadcast);
        mac.on_frame(&mut host, ack_from(neighbor, A)).unwrap();
        assert_eq!(mac.state_name(), "WaitToSend");
    }

    let data_frames = host.transmitted.iter().filter(|f| f.is_data()).count();
    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    assert_eq!(mac.state_name(), "WaitToSend");
    assert_eq!(host.transmitted.iter().filter(|f| f.is_data()).count(), data_frames);

    fire_until(&mut mac, &mut host, MacTimer::SendTimeout);
    assert!(mac.buffer().is_empty());
    assert!(host.results.is_empty());
}

#[test]
fn test_ack_keeps_sending_to_same_node() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();

    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    fire_next(&mut mac, &mut host);
    mac.on_frame(&mut host, ack_from(B, A)).unwrap();
    assert_eq!(mac.state_name(), "Send");
    assert_eq!(mac.buffer().len(), 1);

    fire_next(&mut mac, &mut host);
    mac.on_frame(&mut host, ack_from(B, A)).unwrap();
    assert_eq!(host.results, vec![(B, SendOutcome::Acked), (B, SendOutcome::Acked)]);
    assert_eq!(mac.state_name(), "Sleep");
}

#[test]
fn test_ack_timeout_returns_to_wait_to_send() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    fire_next(&mut mac, &mut host);

    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::WaitForAck);
    assert_eq!(mac.state_name(), "WaitToSend");
    assert_eq!(host.stats.counter("Ricer packet not ACKed"), 1);
    assert!(host.results.is_empty());
    assert_eq!(mac.buffer().len(), 1);
}

#[test]
fn test_send_timeout_during_ack_wait_extends() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    fire_next(&mut mac, &mut host);

    // Pretend the send window just closed
    host.stop_timer(MacTimer::SendTimeout);
    let ack_left = host.timer_remaining(MacTimer::WaitForAck).unwrap();
    mac.on_timer(&mut host, MacTimer::SendTimeout).unwrap();

    assert_eq!(mac.state_name(), "Send");
    assert_eq!(
        host.timer_remaining(MacTimer::SendTimeout).unwrap(),
        ack_left + Duration::from_nanos(1)
    );
}

#[test]
fn test_send_timeout_during_backoff_sleeps() {
    let (mut mac, mut host) = asleep(RicerConfig {
        max_send_retries: 1,
        ..config()
    });
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.on_frame(&mut host, rtr_from(B)).unwrap();

    host.stop_timer(MacTimer::SendTimeout);
    mac.on_timer(&mut host, MacTimer::SendTimeout).unwrap();

    assert!(!host.is_timer_running(MacTimer::SendBackoff));
    assert_eq!(host.results, vec![(B, SendOutcome::Failed)]);
    assert_eq!(mac.state_name(), "Sleep");
}

#[test]
fn test_packet_during_sleep_transition_waits() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_until(&mut mac, &mut host, MacTimer::ListenForData);
    assert!(host.is_timer_running(MacTimer::WaitForSleepTransition));

    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    assert_eq!(mac.state_name(), "Sleep");

    assert_eq!(fire_next(&mut mac, &mut host), MacTimer::WaitForSleepTransition);
    assert_eq!(mac.state_name(), "WaitToSend");
}

#[test]
fn test_wakeup_during_sleep_transition_wins() {
    let mut mac = RicerMac::new(config(), 1).unwrap();
    let mut host = MockHost::new();
    mac.startup(&mut host).unwrap();
    fire_until(&mut mac, &mut host, MacTimer::ListenForData);

    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    host.stop_timer(MacTimer::WakeForReceive);
    mac.on_timer(&mut host, MacTimer::WakeForReceive).unwrap();
    assert_eq!(mac.state_name(), "Sleep");

    fire_next(&mut mac, &mut host);
    assert_eq!(mac.state_name(), "InitiateReceive");
}

#[test]
fn test_buffer_overflow_is_rejected() {
    let (mut mac, mut host) = asleep(RicerConfig {
        mac_buffer_size: 1,
        ..config()
    });
    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(B)).unwrap(), Admission::Queued);
    assert_eq!(mac.submit(&mut host, payload(), Destination::Node(C)).unwrap(), Admission::Overflow);
    assert_eq!(mac.buffered(), 1);
    assert_eq!(host.stats.counter("Ricer buffer overflow"), 1);
}

#[test]
fn test_reset_epoch_clears_everything() {
    let (mut mac, mut host) = asleep(config());
    for node in [B, C, B] {
        mac.submit(&mut host, payload(), Destination::Node(node)).unwrap();
    }
    mac.on_frame(&mut host, rtr_from(B)).unwrap();
    assert!(host.is_timer_running(MacTimer::SendBackoff));

    mac.reset_epoch(&mut host);
    assert_eq!(mac.buffered(), 0);
    assert_eq!(mac.state_name(), "InitiateReceive");
    assert_eq!(mac.target(), None);
    assert!(host.timers.running().is_empty());

    mac.startup(&mut host).unwrap();
    assert!(host.is_timer_running(MacTimer::WaitForRadioRxTransition));
}

#[test]
fn test_data_for_self_while_asleep_is_fatal() {
    let (mut mac, mut host) = asleep(config());
    let data = MacFrame::data(B, Destination::Node(A), payload(), 384);
    let err = mac.on_frame(&mut host, data).unwrap_err();
    assert!(matches!(err, MacError::ProtocolViolation { state: "Sleep", .. }));
}

#[test]
fn test_unexpected_timer_is_fatal() {
    let (mut mac, mut host) = asleep(config());
    let err = mac.on_timer(&mut host, MacTimer::ListenForData).unwrap_err();
    assert!(matches!(err, MacError::UnexpectedTimer { state: "Sleep", .. }));
}

#[test]
fn test_ack_for_self_while_waiting_to_send_is_fatal() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    assert!(mac.on_frame(&mut host, ack_from(B, A)).is_err());
}

#[test]
fn test_overheard_ack_acts_as_beacon() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.on_frame(&mut host, ack_from(B, C)).unwrap();
    assert_eq!(mac.state_name(), "Send");
    assert_eq!(mac.target(), Some(B));
}

#[test]
fn test_finish_reports_leftovers() {
    let (mut mac, mut host) = asleep(config());
    mac.submit(&mut host, payload(), Destination::Node(B)).unwrap();
    mac.submit(&mut host, payload(), Destination::Broadcast).unwrap();
    mac.finish(&mut host);
    assert_eq!(host.stats.summary("Ricer packets left in buffer: Unicast").unwrap().total, 1.0);
    assert_eq!(host.stats.summary("Ricer packets left in buffer: Broadcast").unwrap().total, 1.0);
}
