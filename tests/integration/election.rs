use gondola_core::command_table::{DESTINATION_SUPER_COMMAND, USE_BULLY_ELECTION};
use gondola_core::Invocation;
use gondola_services::CommandStatus;

use crate::*;

/// Units 0, 2 and 3 answer, unit 1 does not: everyone settles on 0.
#[tokio::test]
async fn test_lowest_live_unit_leads() {
    let zero = TestUnit::spawn(0, 3).await.unwrap();
    let two = TestUnit::spawn(2, 3).await.unwrap();
    let three = TestUnit::spawn(3, 3).await.unwrap();
    let (_silent, one) = silent_peer(1).await.unwrap();

    let at_three = coordinator(&three, &[zero.network_peer(), one.clone(), two.network_peer()]).unwrap();
    assert_eq!(at_three.identify_leader().await, 0);
    assert_eq!(three.state.leader_id(), 0);
    assert!(!at_three.is_leader());

    let at_zero = coordinator(&zero, &[one, two.network_peer(), three.network_peer()]).unwrap();
    assert_eq!(at_zero.identify_leader().await, 0);
    assert!(at_zero.is_leader());
}

/// A live leader is kept; once it stops answering the next unit takes over.
#[tokio::test]
async fn test_leader_loss_moves_leadership() {
    let mut zero = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let two = TestUnit::spawn(2, 0).await.unwrap();

    let at_one = coordinator(&one, &[zero.network_peer(), two.network_peer()]).unwrap();
    let at_two = coordinator(&two, &[zero.network_peer(), one.network_peer()]).unwrap();
    assert_eq!(at_two.determine_leader().await, 0);

    zero.stop().await;

    assert_eq!(at_one.determine_leader().await, 1);
    assert!(one.state.is_leader());
    assert_eq!(at_two.determine_leader().await, 1);
    assert!(!two.state.is_leader());
}

/// A commanded leader holds until the election is handed back.
#[tokio::test]
async fn test_commanded_leader_until_election_restored() {
    let zero = TestUnit::spawn(0, 0).await.unwrap();
    let two = TestUnit::spawn(2, 0).await.unwrap();
    let at_two = coordinator(&two, &[zero.network_peer()]).unwrap();

    let take = command_frame(1, DESTINATION_SUPER_COMMAND, &[Invocation::new("set_leader").arg("leader_id", 2u8)]).unwrap();
    assert_eq!(at_two.process_command_packet(&take).await, Some(CommandStatus::Ok));
    assert!(two.state.is_leader());
    assert!(!two.state.election_enabled());

    // Unit 0 answers, but the election is off.
    assert_eq!(at_two.determine_leader().await, 2);

    let restore = command_frame(
        2,
        DESTINATION_SUPER_COMMAND,
        &[Invocation::new("set_leader").arg("leader_id", USE_BULLY_ELECTION)],
    )
    .unwrap();
    assert_eq!(at_two.process_command_packet(&restore).await, Some(CommandStatus::Ok));
    assert!(two.state.election_enabled());
    assert_eq!(at_two.identify_leader().await, 0);
}
