//! 控制指令集成测试
//!
//! 验证去重、校验、机械臂动作映射，以及对端回显对控制状态的影响。

mod common;

use common::{Harness, SimulatedRobot, wait_until};
use rover_sdk::protocol::CONNECT_TOPIC;
use rover_sdk::{ArmAction, ArmPosture, ControllerState, Direction, Endpoint, SessionError};
use serde_json::{Value, json};

fn connected() -> (Harness, SimulatedRobot) {
    let harness = Harness::new();
    let robot = SimulatedRobot::spawn(&harness.broker, "robot-1");
    harness
        .controller
        .connect(Endpoint::new("localhost", 1883))
        .unwrap();
    harness.drain();
    (harness, robot)
}

/// 本端在控制主题上发布的 JSON 指令
fn sent_commands(harness: &Harness) -> Vec<Value> {
    harness
        .broker
        .published()
        .into_iter()
        .filter(|m| m.client_id == "ctrl-1" && m.topic == harness.control_topic(1))
        .map(|m| serde_json::from_slice(&m.payload).unwrap())
        .collect()
}

#[test]
fn test_commands_rejected_when_not_connected() {
    let harness = Harness::new();

    assert!(matches!(
        harness.controller.update_movement(0.5, 0.5),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        harness.controller.dispatch_arm_action(ArmAction::In),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        harness.controller.set_ai_enabled(true),
        Err(SessionError::NotConnected)
    ));
    assert!(matches!(
        harness.controller.switch_state(ControllerState::Roaming),
        Err(SessionError::NotConnected)
    ));
    assert!(harness.broker.published().is_empty());
}

#[test]
fn test_same_movement_published_once() {
    let (harness, _robot) = connected();

    harness.controller.update_movement(0.5, -0.5).unwrap();
    harness.controller.update_movement(0.5, -0.5).unwrap();

    assert_eq!(
        sent_commands(&harness),
        vec![json!({"command": "move", "metadata": {"x": 0.5, "y": -0.5}})]
    );
    let metrics = harness.controller.metrics();
    assert_eq!(metrics.frames_published, 1);
    assert_eq!(metrics.commands_deduplicated, 1);
}

#[test]
fn test_out_of_range_movement_publishes_nothing() {
    let (harness, _robot) = connected();

    let err = harness.controller.update_movement(1.5, 0.0).unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("1.5"));
    assert!(sent_commands(&harness).is_empty());
}

#[test]
fn test_arm_in_in_stop() {
    let (harness, _robot) = connected();

    harness.controller.dispatch_arm_action(ArmAction::In).unwrap();
    harness.controller.dispatch_arm_action(ArmAction::In).unwrap();
    harness.controller.dispatch_arm_action(ArmAction::Stop).unwrap();

    assert_eq!(
        sent_commands(&harness),
        vec![json!({"command": "arm_in"}), json!({"command": "arm_stop"})]
    );
}

#[test]
fn test_grab_publishes_nothing() {
    let (harness, _robot) = connected();
    harness.controller.dispatch_arm_action(ArmAction::Grab).unwrap();
    assert!(sent_commands(&harness).is_empty());
    assert_eq!(harness.controller.snapshot().arm_posture, ArmPosture::Neutral);
}

#[test]
fn test_arm_save_uses_set_position_tag() {
    let (harness, _robot) = connected();
    harness.controller.dispatch_arm_action(ArmAction::Save).unwrap();
    harness.controller.dispatch_arm_action(ArmAction::Reset).unwrap();
    assert_eq!(
        sent_commands(&harness),
        vec![
            json!({"command": "arm_set_position"}),
            json!({"command": "arm_reset_position"})
        ]
    );
}

#[test]
fn test_ai_toggle_always_published() {
    let (harness, _robot) = connected();
    harness.controller.set_ai_enabled(true).unwrap();
    harness.controller.set_ai_enabled(true).unwrap();
    assert_eq!(
        sent_commands(&harness),
        vec![
            json!({"command": "set_ai_active", "metadata": {"active": true}}),
            json!({"command": "set_ai_active", "metadata": {"active": true}})
        ]
    );
}

#[test]
fn test_local_movement_emits_snapshot() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(-0.4, 0.7).unwrap();

    let snapshot = harness.wait_snapshot(|s| !s.is_idle());
    assert_eq!(snapshot.magnitude(Direction::Left), Some(0.4));
    assert_eq!(snapshot.magnitude(Direction::Forward), Some(0.7));
    assert_eq!(snapshot.directions.len(), 2);
}

#[test]
fn test_inbound_switch_state_resets_vector() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.3, 0.6).unwrap();
    harness.wait_snapshot(|s| !s.is_idle());

    harness.broker.inject(
        &harness.control_topic(1),
        r#"{"command":"switch_state","metadata":{"state":"roaming"}}"#,
    );

    harness.wait_snapshot(|s| s.is_idle());
    assert!(wait_until(|| harness.controller.snapshot().is_idle()));
}

#[test]
fn test_inbound_arm_state_updates_posture() {
    let (harness, _robot) = connected();
    harness
        .broker
        .inject(&harness.control_topic(1), r#"{"command":"arm_out"}"#);

    let snapshot = harness.wait_snapshot(|s| s.arm_posture == ArmPosture::Down);
    assert!(snapshot.is_idle());
}

#[test]
fn test_local_switch_state_zeroes_vector() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.0, 1.0).unwrap();
    harness.wait_snapshot(|s| s.magnitude(Direction::Forward) == Some(1.0));

    harness
        .controller
        .switch_state(ControllerState::Grabbing)
        .unwrap();
    harness.wait_snapshot(|s| s.is_idle());

    let last = sent_commands(&harness).pop().unwrap();
    assert_eq!(
        last,
        json!({"command": "switch_state", "metadata": {"state": "grabbing"}})
    );
}

#[test]
fn test_malformed_frames_are_counted_and_discarded() {
    let (harness, _robot) = connected();
    let topic = harness.control_topic(1);

    harness.broker.inject(&topic, "not json");
    harness.broker.inject(&topic, r#"{"command":"fly"}"#);
    harness
        .broker
        .inject(&topic, r#"{"command":"move","metadata":{"x":3,"y":0}}"#);
    harness.broker.inject(&topic, "[1,2,3]");

    assert!(wait_until(|| harness.controller.metrics().malformed_frames == 4));
    assert!(harness.controller.is_connected());
    assert!(harness.controller.snapshot().is_idle());
}

#[test]
fn test_disconnect_clears_control_state() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.6, -0.2).unwrap();
    harness.controller.dispatch_arm_action(ArmAction::Out).unwrap();
    harness.wait_snapshot(|s| s.arm_posture == ArmPosture::Down);

    harness.broker.clear_log();
    harness.controller.disconnect().unwrap();

    let snapshot = harness.wait_snapshot(|s| s.is_idle());
    assert_eq!(snapshot.arm_posture, ArmPosture::Neutral);
    assert!(harness.controller.snapshot().is_idle());
    assert_eq!(harness.controller.snapshot().arm_posture, ArmPosture::Neutral);
    assert_eq!(harness.broker.published_on(CONNECT_TOPIC), vec!["close_con:ctrl-1"]);
    assert_eq!(harness.broker.online_clients(), vec!["robot-1"]);
}

#[test]
fn test_lost_session_clears_control_state() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.0, 0.9).unwrap();
    harness.wait_snapshot(|s| !s.is_idle());

    harness.broker.inject(CONNECT_TOPIC, "close_con:robot-1");

    harness.wait_snapshot(|s| s.is_idle());
    assert!(wait_until(|| !harness.controller.is_connected()));
    assert!(harness.controller.snapshot().is_idle());
}

#[test]
fn test_own_echo_leaves_state_untouched() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.5, 0.0).unwrap();
    harness.controller.update_movement(0.0, 0.0).unwrap();

    // 两条回显都被消费，不会产生额外快照
    assert!(wait_until(|| harness.controller.metrics().frames_received == 2));
    harness.drain();
    harness.controller.update_movement(0.5, 0.0).unwrap();

    assert_eq!(sent_commands(&harness).len(), 3);
    assert_eq!(
        harness.controller.snapshot().magnitude(Direction::Right),
        Some(0.5)
    );
}

#[test]
fn test_reset_metrics() {
    let (harness, _robot) = connected();
    harness.controller.update_movement(0.1, 0.1).unwrap();
    harness.controller.update_movement(0.1, 0.1).unwrap();
    assert_eq!(harness.controller.metrics().commands_deduplicated, 1);

    harness.controller.reset_metrics();

    let metrics = harness.controller.metrics();
    assert_eq!(metrics.frames_published, 0);
    assert_eq!(metrics.commands_deduplicated, 0);
    assert_eq!(metrics.handshakes_completed, 0);
    assert!(harness.controller.is_connected());
}
