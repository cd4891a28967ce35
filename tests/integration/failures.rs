use std::collections::BTreeSet;

use groundlink_core::{Packet, QueueBitmap};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Lossy link
// ══════════════════════════════════════════════════════════════════════════════

/// Chunks 3 and 7 are lost on first transmission. The receiver reports
/// exactly those two holes and the sender fills them.
#[test]
fn test_lost_chunks_are_requested_and_resent() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(1000);
    sat.stage(GROUND, "camera", "img.raw", &content).unwrap();

    let mut dropped = BTreeSet::new();
    let mut holes = BTreeSet::new();
    let dest = ground.incoming_path(SAT, "camera", "img.raw");
    run_until(
        &mut sat,
        &mut ground,
        60,
        &mut |p| match is_data(p) {
            Some(start @ (300 | 700)) if dropped.insert(start) => Fate::Drop,
            _ => Fate::Deliver,
        },
        &mut |p| {
            if let Packet::ReqData { hole_start, hole_end, .. } = p {
                holes.insert((*hole_start, *hole_end));
            }
            Fate::Deliver
        },
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not recover");

    assert_eq!(dropped.len(), 2);
    assert_eq!(holes, BTreeSet::from([(300, 399), (700, 799)]));
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[test]
fn test_lost_metadata_is_requested() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(350);
    sat.stage(GROUND, "camera", "m.raw", &content).unwrap();

    let mut lost_meta = false;
    let mut asked = false;
    let dest = ground.incoming_path(SAT, "camera", "m.raw");
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut |p| match p {
            Packet::Metadata { .. } if !lost_meta => {
                lost_meta = true;
                Fate::Drop
            }
            _ => Fate::Deliver,
        },
        &mut |p| {
            asked |= matches!(p, Packet::ReqMeta { .. });
            Fate::Deliver
        },
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not recover from lost metadata");

    assert!(lost_meta && asked);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

/// The receiver's COMPLETE is lost; the sender keeps asking and the
/// finished record answers again.
#[test]
fn test_lost_complete_is_repeated() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    sat.stage(GROUND, "camera", "c.raw", &pattern(250)).unwrap();

    let mut completes = 0;
    let dest = ground.incoming_path(SAT, "camera", "c.raw");
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut deliver_all,
        &mut |p| {
            if matches!(p, Packet::Complete { .. }) {
                completes += 1;
                if completes == 1 {
                    return Fate::Drop;
                }
            }
            Fate::Deliver
        },
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not finish");
    assert!(completes >= 2);
}

/// A QUEUE announcement delivered twice changes nothing.
#[test]
fn test_duplicate_queue_is_idempotent() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(600);
    sat.stage(GROUND, "camera", "q.raw", &content).unwrap();

    // First round with every QUEUE duplicated.
    pump(&mut sat, &mut ground, &mut |p| match p {
        Packet::Queue { .. } => Fate::Duplicate,
        _ => Fate::Deliver,
    });
    let before = ground.engine.list_incoming();
    assert_eq!(before.len(), 1);

    // Replaying the same announcement mid-transfer leaves the record alone.
    let tx_id = before[0].tx_id;
    let replay = Packet::Queue {
        origin: 1,
        peer_name: GROUND.into(),
        bitmap: QueueBitmap::from_ids([tx_id]),
    };
    ground.engine.receive(replay.clone()).unwrap();
    ground.engine.receive(replay).unwrap();
    assert_eq!(ground.engine.list_incoming(), before);

    let dest = ground.incoming_path(SAT, "camera", "q.raw");
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut |p| match p {
            Packet::Queue { .. } => Fate::Duplicate,
            _ => Fate::Deliver,
        },
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not finish");
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

/// QUEUE addressed to a third node is ignored even when it comes from a
/// known peer.
#[test]
fn test_queue_for_other_node_is_ignored() {
    let mut ground = Node::new(GROUND).unwrap();
    let packet = Packet::Queue {
        origin: 1,
        peer_name: "relay".into(),
        bitmap: QueueBitmap::from_ids([4, 5]),
    };
    ground.engine.receive(packet).unwrap();
    assert!(ground.engine.list_incoming().is_empty());
}

/// Everything from the sender is lost for a while; once the link heals
/// the transfer completes without intervention.
#[test]
fn test_blackout_then_recovery() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(900);
    sat.stage(GROUND, "camera", "b.raw", &content).unwrap();

    let mut sent = 0;
    let dest = ground.incoming_path(SAT, "camera", "b.raw");
    run_until(
        &mut sat,
        &mut ground,
        80,
        &mut |_| {
            sent += 1;
            // first five packets vanish
            if sent <= 5 { Fate::Drop } else { Fate::Deliver }
        },
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not recover from blackout");
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

// ══════════════════════════════════════════════════════════════════════════════
//  Corrupt state on disk
// ══════════════════════════════════════════════════════════════════════════════

/// A corrupted incoming checkpoint is discarded at restart and the file
/// is received again from scratch.
#[test]
fn test_corrupt_checkpoint_restarts_transfer() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(1000);
    sat.stage(GROUND, "camera", "x.raw", &content).unwrap();

    // metadata + four chunks
    let mut data_seen = 0;
    run_until(&mut sat, &mut ground, 20, &mut deliver_all, &mut deliver_all, |_, g| {
        data_seen = g.engine.list_incoming().first().map_or(0, |r| r.total_bytes);
        data_seen >= 400
    })
    .expect("partial transfer did not happen");
    assert_eq!(data_seen, 400);

    let metas: Vec<_> = std::fs::read_dir(ground.temp_dir(SAT))
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "meta"))
        .collect();
    assert_eq!(metas.len(), 1);
    let mut bytes = std::fs::read(&metas[0]).unwrap();
    bytes[20] ^= 0xff;
    std::fs::write(&metas[0], bytes).unwrap();

    let mut ground = ground.restart().unwrap();
    assert!(ground.engine.list_incoming().is_empty());
    assert!(!metas[0].exists());
    assert!(!metas[0].with_extension("file").exists());

    let dest = ground.incoming_path(SAT, "camera", "x.raw");
    run_until(
        &mut sat,
        &mut ground,
        80,
        &mut deliver_all,
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not restart after checkpoint loss");
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}
