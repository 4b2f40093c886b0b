use gondola_core::command::LIST_ARGUMENT;
use gondola_core::command_table::{DESTINATION_ALL_CAMERAS, DESTINATION_SUPER_COMMAND};
use gondola_core::{Invocation, Value};
use gondola_services::{CommandStatus, UplinkPacket, UplinkScanner};

use crate::*;

/// Command to every camera: the uplink stream arrives in pieces, the leader
/// runs the command on itself and on both followers.
#[tokio::test]
async fn test_command_reaches_every_member() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let two = TestUnit::spawn(2, 0).await.unwrap();
    let mut coordinator = coordinator(&leader, &[one.network_peer(), two.network_peer()]).unwrap();

    let frame = command_frame(
        5,
        DESTINATION_ALL_CAMERAS,
        &[Invocation::new("set_focus").arg("focus_step", 1500u16)],
    )
    .unwrap();
    let mut stream = vec![0x00, 0x42];
    stream.extend_from_slice(&frame);

    let mut scanner = UplinkScanner::new();
    let (first, second) = stream.split_at(stream.len() / 2);
    assert!(scanner.push(first).is_empty());
    let packets = scanner.push(second);
    assert_eq!(packets.len(), 1);
    assert!(matches!(packets[0], UplinkPacket::ScienceCommand(_)));

    assert!(coordinator.handle_uplink(&packets[0]).await.is_none());

    for unit in [&leader, &one, &two] {
        assert_eq!(unit.controller.executed().await, vec!["set_focus"], "unit {}", unit.id);
    }
    let log = leader.state.log().lock().await;
    let latest = log.latest().unwrap();
    assert_eq!(latest.sequence_number, 5);
    assert_eq!(latest.status, CommandStatus::Ok);
}

/// One member not answering rejects the packet before anything runs.
#[tokio::test]
async fn test_unreachable_member_rejects_packet() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let (_silent, dead) = silent_peer(2).await.unwrap();
    let coordinator = coordinator(&leader, &[one.network_peer(), dead]).unwrap();

    let frame = command_frame(
        9,
        DESTINATION_ALL_CAMERAS,
        &[Invocation::new("set_exposure").arg("exposure_time_us", 800u32)],
    )
    .unwrap();
    let status = coordinator.process_command_packet(&frame).await;
    assert_eq!(status, Some(CommandStatus::FailedToPingDestination));

    assert!(leader.controller.executed().await.is_empty());
    assert!(one.controller.executed().await.is_empty());

    let log = leader.state.log().lock().await;
    let record = log.last_failed().unwrap();
    assert_eq!(record.sequence_number, 9);
    assert!(record.details.contains("units [2]"), "details: {}", record.details);
}

/// A follower refusing a command comes back as a logged command error.
#[tokio::test]
async fn test_remote_failure_is_logged() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    one.controller.refuse("request_specific_images").await;
    let coordinator = coordinator(&leader, &[one.network_peer()]).unwrap();

    let invocation = Invocation::new("request_specific_images")
        .arg("timestamp", 1_700_000_000.5f64)
        .arg("request_id", 3u32)
        .arg("num_images", 2u16)
        .arg("step", -1i32)
        .arg("row_offset", 0u16)
        .arg("column_offset", 0u16)
        .arg("num_rows", 100u16)
        .arg("num_columns", 100u16)
        .arg("scale_by", 0.5f32)
        .arg("quality", 75f32);
    let frame = command_frame(11, 1, &[invocation]).unwrap();

    let status = coordinator.process_command_packet(&frame).await;
    assert_eq!(status, Some(CommandStatus::CommandError));

    let log = leader.state.log().lock().await;
    let record = log.latest().unwrap();
    assert_eq!(record.status, CommandStatus::CommandError);
    assert!(record.details.contains("unit 1"), "details: {}", record.details);
    assert!(record.details.contains("refused"), "details: {}", record.details);
}

/// Followers act only on super commands addressed to themselves.
#[tokio::test]
async fn test_follower_accepts_only_super_commands() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let follower = TestUnit::spawn(1, 0).await.unwrap();
    let coordinator = coordinator(&follower, &[leader.network_peer()]).unwrap();

    let focus = command_frame(
        1,
        DESTINATION_ALL_CAMERAS,
        &[Invocation::new("set_focus").arg("focus_step", 10u16)],
    )
    .unwrap();
    assert_eq!(coordinator.process_command_packet(&focus).await, None);
    assert!(leader.controller.executed().await.is_empty());
    assert!(follower.controller.executed().await.is_empty());

    let order = Value::List(vec![Value::from(1u8), Value::from(0u8)]);
    let polling = command_frame(
        2,
        DESTINATION_SUPER_COMMAND,
        &[Invocation::new("set_peer_polling_order").arg(LIST_ARGUMENT, order)],
    )
    .unwrap();
    assert_eq!(coordinator.process_command_packet(&polling).await, Some(CommandStatus::Ok));
    assert_eq!(follower.state.polling_order().await, vec![1, 0]);
}

/// `set_leader` sent through the leader lands on the addressed unit.
#[tokio::test]
async fn test_set_leader_over_rpc() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let coordinator = coordinator(&leader, &[one.network_peer()]).unwrap();

    let frame = command_frame(3, 1, &[Invocation::new("set_leader").arg("leader_id", 1u8)]).unwrap();
    assert_eq!(coordinator.process_command_packet(&frame).await, Some(CommandStatus::Ok));

    assert!(one.state.is_leader());
    assert!(!one.state.election_enabled());
    // Link-layer commands never reach the camera side.
    assert!(one.controller.executed().await.is_empty());
}
