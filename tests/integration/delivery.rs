//! Request/response exchanges tracked end to end.

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::time::{Duration, Instant};

use jaus_core::codec::Packet;
use jaus_core::config::JausConfig;
use jaus_core::wire::{AckNack, Header};
use jaus_services::catalog::MessageCatalog;
use jaus_services::delivery::{DeliveryPolicy, DeliveryTracker, Overdue};
use jaus_services::messages::{codes, QueryGlobalPose, ReportGlobalPose, SetTime};
use jaus_services::receipt::ReceiptStatus;

use crate::*;

/// The vehicle side: answer a pose query with the fields it asked for.
fn vehicle_answers(catalog: &MessageCatalog, request: Bytes) -> Result<Bytes> {
    let (header, message) = catalog
        .decode(&mut Packet::from(request))?
        .context("vehicle does not know the request")?;
    let query = message
        .as_any()
        .downcast_ref::<QueryGlobalPose>()
        .context("not a pose query")?;

    let wants = |bit: u8| query.requested & (1 << bit) != 0;
    let report = ReportGlobalPose {
        latitude: wants(0).then_some(37.25),
        longitude: wants(1).then_some(-122.5),
        yaw: wants(6).then_some(1.5),
        ..ReportGlobalPose::default()
    };
    frame(&report, header.destination, header.source)
}

#[tokio::test(start_paused = true)]
async fn test_pose_query_round_trip() -> Result<()> {
    let catalog = MessageCatalog::new();
    let tracker = DeliveryTracker::new(catalog.clone());

    let query = QueryGlobalPose {
        requested: 0b0100_0011,
    };
    let request = frame(&query, OPERATOR, VEHICLE)?;
    let id = tracker.register(request.clone(), [codes::REPORT_GLOBAL_POSE])?;

    tokio::time::advance(Duration::from_millis(30)).await;
    let response = vehicle_answers(&catalog, request)?;
    assert_eq!(tracker.on_incoming(response), Some(id));

    let receipt = tracker.get(id).context("receipt vanished")?;
    assert_eq!(receipt.status(), ReceiptStatus::Success);
    assert_eq!(receipt.response_time(), Duration::from_millis(30));
    assert_eq!(receipt.response_message_code(), Some(codes::REPORT_GLOBAL_POSE));
    let report = receipt
        .response()
        .and_then(|m| m.as_any().downcast_ref::<ReportGlobalPose>())
        .context("response not decoded")?;
    assert!(report.latitude.is_some() && report.yaw.is_some());
    assert!(report.elevation.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_command_is_retried_then_times_out() -> Result<()> {
    let config = JausConfig::default();
    let policy = DeliveryPolicy::from(&config.delivery);
    let tracker = DeliveryTracker::new(MessageCatalog::new());

    let mut header = Header::new(0, VEHICLE, OPERATOR);
    header.ack_nack = AckNack::Request;
    let command = jaus_core::message::encode(&SetTime::default(), &header)?.freeze();
    let id = tracker.register(command, [])?;

    // Timer path: resend while sends remain, then give up.
    let mut sends = 1;
    loop {
        tokio::time::advance(policy.timeout).await;
        let overdue = tracker.overdue(&policy, Instant::now());
        assert_eq!(overdue.len(), 1);
        match overdue[0] {
            (overdue_id, Overdue::Resend) => {
                assert_eq!(overdue_id, id);
                assert!(tracker.record_retry(id));
                sends += 1;
            }
            (overdue_id, Overdue::Exhausted) => {
                assert!(tracker.mark_timeout(overdue_id));
                break;
            }
        }
    }
    assert_eq!(sends, config.delivery.max_sends);
    assert_eq!(tracker.status(id), Some(ReceiptStatus::Timeout));

    // A late acknowledgement changes nothing.
    let mut ack = header.reply(AckNack::Ack);
    ack.command_code = codes::SET_TIME;
    let ack_frame = Bytes::copy_from_slice(&ack.encode()?);
    assert_eq!(tracker.on_incoming(ack_frame), None);
    tracker.print_stats();
    Ok(())
}

#[tokio::test]
async fn test_acknowledged_command() -> Result<()> {
    let tracker = DeliveryTracker::new(MessageCatalog::new());
    let mut header = Header::new(0, VEHICLE, OPERATOR);
    header.ack_nack = AckNack::Request;
    let command = jaus_core::message::encode(&SetTime::default(), &header)?.freeze();
    let id = tracker.register(command.clone(), [])?;

    // The vehicle acknowledges the frame it received.
    let received = Header::parse(&command)?;
    let ack = received.reply(AckNack::Ack);
    let ack_frame = Bytes::copy_from_slice(&ack.encode()?);
    assert_eq!(tracker.on_incoming(ack_frame), Some(id));

    let receipt = tracker.remove(id).context("receipt vanished")?;
    assert!(receipt.received_acknowledge());
    assert_eq!(receipt.sent_message_code(), codes::SET_TIME);
    assert!(tracker.is_empty());
    Ok(())
}
