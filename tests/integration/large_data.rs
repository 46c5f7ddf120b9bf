//! Large data sets: fragment, lose, re-request and reassemble.

use anyhow::{Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::time::Duration;

use jaus_core::codec::Packet;
use jaus_core::config::JausConfig;
use jaus_services::catalog::MessageCatalog;
use jaus_services::fragment::{create_fragments, select_retransmits, Fragment};
use jaus_services::reassembly::Reassembler;

use crate::*;

fn small_packets() -> JausConfig {
    let mut config = JausConfig::default();
    config.fragmentation.max_packet_size = 1024;
    config.reassembly.stall_delay_ms = 100;
    config
}

/// Serialize every fragment and parse it back, as the transport would.
fn over_the_wire(fragments: &[Fragment]) -> Result<Vec<Fragment>> {
    fragments
        .iter()
        .map(|f| {
            let bytes = f.to_bytes()?;
            Ok(Fragment::parse(&bytes)?)
        })
        .collect()
}

fn spooled_mission(catalog: &MessageCatalog, tasks: u16) -> Result<Bytes> {
    let mission = survey_mission(tasks)?;
    frame(
        &SpoolMission::new(mission, catalog.clone()),
        OPERATOR,
        VEHICLE,
    )
}

#[tokio::test]
async fn test_mission_spooled_out_of_order() -> Result<()> {
    let config = small_packets();
    config.validate()?;
    let catalog = MessageCatalog::new();
    assert!(SpoolMission::register(&catalog));

    let sent = spooled_mission(&catalog, 60)?;
    let mut fragments = create_fragments(&sent, config.fragmentation.max_payload())?;
    assert!(fragments.len() > 4, "expected several fragments, got {}", fragments.len());
    fragments.shuffle(&mut StdRng::seed_from_u64(7));

    let reassembler = Reassembler::new(config.reassembly.clone());
    let mut merged = None;
    for fragment in over_the_wire(&fragments)? {
        if let Some(bytes) = reassembler.add_fragment(fragment).await {
            merged = Some(bytes);
        }
    }
    let merged = merged.context("set never completed")?;
    assert_eq!(merged, sent);

    let (header, message) = catalog
        .decode(&mut Packet::from(merged))?
        .context("spool message not recognised")?;
    assert_eq!(header.source, OPERATOR);
    let spool = message
        .as_any()
        .downcast_ref::<SpoolMission>()
        .context("wrong message type")?;
    let mission = spool.mission.as_ref().context("mission missing")?;
    assert_eq!(mission.id(), 500);
    assert_eq!(mission.task_ids().len(), 60);
    assert_eq!(mission.find(60).and_then(|t| t.parent_id()), Some(59));
    assert_eq!(mission.find(5).and_then(|t| t.parent_id()), Some(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lost_fragments_are_requested_and_resent() -> Result<()> {
    let config = small_packets();
    let catalog = MessageCatalog::new();
    SpoolMission::register(&catalog);

    let sent = spooled_mission(&catalog, 40)?;
    let fragments = create_fragments(&sent, config.fragmentation.max_payload())?;
    let lost: Vec<u16> = vec![fragments[1].sequence_number(), fragments[3].sequence_number()];

    let reassembler = Reassembler::new(config.reassembly.clone());
    for fragment in fragments.iter().filter(|f| !lost.contains(&f.sequence_number())) {
        assert!(reassembler.add_fragment(fragment.clone()).await.is_none());
    }

    // Timer path: nothing is stalled until the link has been quiet.
    let delay = config.reassembly.stall_delay();
    assert!(reassembler.stalled_sets(delay).await.is_empty());
    tokio::time::advance(delay + Duration::from_millis(1)).await;

    let stalled = reassembler.stalled_sets(delay).await;
    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].missing, lost);
    reassembler
        .record_retransmit_request(&stalled[0].key, stalled[0].missing.len())
        .await;

    // Sender side answers the request.
    let resend = select_retransmits(&fragments, &stalled[0].missing);
    assert_eq!(resend.len(), 2);
    let mut merged = None;
    for fragment in over_the_wire(&resend)? {
        merged = reassembler.add_fragment(fragment).await.or(merged);
    }
    assert_eq!(merged.context("set never completed")?, sent);
    assert!(reassembler.in_progress().await.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_set_is_given_up() -> Result<()> {
    let mut config = small_packets();
    config.reassembly.max_retransmit_requests = 2;
    let catalog = MessageCatalog::new();
    SpoolMission::register(&catalog);

    let sent = spooled_mission(&catalog, 30)?;
    let fragments = create_fragments(&sent, config.fragmentation.max_payload())?;
    let reassembler = Reassembler::new(config.reassembly.clone());
    let lost = fragments[2].sequence_number();
    for fragment in fragments.iter().filter(|f| f.sequence_number() != lost) {
        reassembler.add_fragment(fragment.clone()).await;
    }

    let delay = config.reassembly.stall_delay();
    for _ in 0..2 {
        tokio::time::advance(delay * 2).await;
        let stalled = reassembler.stalled_sets(delay).await;
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].missing, vec![lost]);
        reassembler
            .record_retransmit_request(&stalled[0].key, stalled[0].missing.len())
            .await;
    }
    tokio::time::advance(delay * 2).await;
    assert!(reassembler.stalled_sets(delay).await.is_empty());

    let key = fragments[1].key();
    assert!(reassembler.abandon(&key).await);
    assert!(reassembler.in_progress().await.is_empty());
    Ok(())
}
