use std::time::{Duration, Instant};

use gondola_core::short_status::{OneByteSummary, ShortStatus, StatusKind, NO_RESPONSE_SUMMARY};
use gondola_core::{FilePacket, Invocation, Packet};
use gondola_services::{unframe_lowrate, FileReassembler, UplinkPacket};

use crate::*;

async fn request_status(coordinator: &mut Coordinator) -> ShortStatus {
    let frame = coordinator.handle_uplink(&UplinkPacket::ScienceDataRequest).await.unwrap();
    ShortStatus::decode_any(unframe_lowrate(&frame).unwrap()).unwrap()
}

/// Payloads polled from a follower over RPC come out of the leader's link
/// as fragments that reassemble into the original files.
#[tokio::test]
async fn test_polled_payloads_reach_the_ground() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let image: Vec<u8> = (0..2500u32).map(|i| (i * 7 % 256) as u8).collect();
    one.controller.push_payload(image.clone()).await;
    one.controller.push_payload(&b"housekeeping"[..]).await;
    leader.state.set_polling_order(vec![1]).await;

    let mut coordinator = coordinator(&leader, &[one.network_peer()]).unwrap();
    let reassembler = FileReassembler::new();
    let mut files = Vec::new();
    let mut now = Instant::now();
    for _ in 0..40 {
        for (link, packet) in coordinator.service_downlinks(now).await {
            assert_eq!(link, "highrate");
            let fragment = FilePacket::decode(&packet).unwrap();
            if let Some(file) = reassembler.add_fragment(fragment).await {
                files.push(file);
            }
        }
        now += Duration::from_millis(100);
    }

    assert_eq!(files.len(), 2);
    assert_eq!(&files[0].data[..], &image[..]);
    assert_eq!(files[0].fragment_count, 5);
    assert_eq!(&files[1].data[..], b"housekeeping");
    assert_ne!(files[0].file_id, files[1].file_id);
    assert_eq!(leader.state.current_file_id(), 2);
}

/// Science data requests walk the status rotation: the leader record with
/// one summary byte per unit, then each reachable camera's own record.
#[tokio::test]
async fn test_data_requests_rotate_status() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let (_silent, dead) = silent_peer(2).await.unwrap();
    let mut coordinator = coordinator(&leader, &[one.network_peer(), dead]).unwrap();

    let record = request_status(&mut coordinator).await;
    assert_eq!(record.kind(), StatusKind::Leader);
    let own = OneByteSummary::decode(record.get("status_byte_camera_0").unwrap() as u8);
    assert!(own.is_leader);
    assert!(own.controller_alive);
    let follower = OneByteSummary::decode(record.get("status_byte_camera_1").unwrap() as u8);
    assert!(!follower.is_leader);
    assert!(follower.controller_alive);
    assert_eq!(record.get("status_byte_camera_2"), Some(f64::from(NO_RESPONSE_SUMMARY)));

    for expected in [0.0, 1.0] {
        let record = request_status(&mut coordinator).await;
        assert_eq!(record.kind(), StatusKind::Camera);
        assert_eq!(record.get("message_id"), Some(expected));
        assert_eq!(record.get("leader_id"), Some(0.0));
        assert_eq!(record.get("focus_step"), Some(2000.0));
    }

    // Unit 2 is skipped and the rotation wraps to the leader record.
    assert_eq!(request_status(&mut coordinator).await.kind(), StatusKind::Leader);
}

/// The short status goes out ahead of payload fragments already queued.
#[tokio::test]
async fn test_autosend_jumps_the_queue() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    leader.controller.push_payload(vec![0x55u8; 1800]).await;
    leader.state.set_polling_order(vec![0]).await;

    let mut coordinator = coordinator(&leader, &[])
        .unwrap()
        .with_short_status_interval(Duration::from_secs(10));
    let now = Instant::now();

    // Capacity pass: the payload is queued, nothing released yet.
    assert!(coordinator.service_downlinks(now).await.is_empty());
    let queued = leader.state.downlinks().get("highrate").unwrap().queued_packets();
    assert_eq!(queued, 4);

    assert_eq!(coordinator.autosend_short_status(now).await, 1);
    let released = coordinator.tick_downlinks(now);
    let fragment = FilePacket::decode(&released[0].1).unwrap();
    assert_eq!(fragment.file_id, 1);
    let status = ShortStatus::decode_any(&fragment.payload).unwrap();
    assert_eq!(status.kind(), StatusKind::Leader);

    // Not due again within the interval.
    assert_eq!(coordinator.autosend_short_status(now + Duration::from_secs(1)).await, 0);
}

/// With synchronized images on, each polling round starts by asking every
/// idle unit for the same capture time over RPC.
#[tokio::test]
async fn test_synchronized_images_over_rpc() {
    let leader = TestUnit::spawn(0, 0).await.unwrap();
    let one = TestUnit::spawn(1, 0).await.unwrap();
    let busy = TestUnit::spawn(2, 0).await.unwrap();
    busy.controller.push_payload(&b"backlog"[..]).await;
    leader.state.set_polling_order(vec![1, 2]).await;
    let sync = Invocation::new("use_synchronized_images").arg("synchronize", 1u8);
    leader.state.apply(&sync).await.unwrap();

    let mut coordinator = coordinator(&leader, &[one.network_peer(), busy.network_peer()])
        .unwrap()
        .with_synchronized_image_delay(Duration::from_secs(5));
    coordinator.service_downlinks(Instant::now()).await;

    let at_leader = leader.controller.image_requests().await;
    let at_one = one.controller.image_requests().await;
    assert_eq!(at_leader.len(), 1);
    assert_eq!(at_one, at_leader);
    assert!(busy.controller.image_requests().await.is_empty());
}
