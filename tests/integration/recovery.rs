use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Restart from checkpoints
// ══════════════════════════════════════════════════════════════════════════════

/// Send metadata and the first `chunks` DATA packets of a 1000-byte file.
fn partial_transfer(sat: &mut Node, ground: &mut Node, chunks: u64) {
    run_until(sat, ground, 30, &mut deliver_all, &mut deliver_all, |_, g| {
        g.engine
            .list_incoming()
            .first()
            .is_some_and(|r| r.total_bytes >= chunks * 100)
    })
    .expect("partial transfer did not happen");
}

/// Both daemons restart after four of ten chunks. Only the remaining six
/// cross the link afterwards.
#[test]
fn test_restart_resumes_where_it_stopped() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(1000);
    sat.stage(GROUND, "camera", "r.raw", &content).unwrap();

    partial_transfer(&mut sat, &mut ground, 4);
    let tx_id = sat.engine.list_outgoing()[0].tx_id;

    let mut sat = sat.restart().unwrap();
    let mut ground = ground.restart().unwrap();

    let out = sat.engine.list_outgoing();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].tx_id, tx_id);
    assert_eq!(out[0].bytes_sent, 400);
    let inc = ground.engine.list_incoming();
    assert_eq!(inc.len(), 1);
    assert_eq!(inc[0].tx_id, tx_id);
    assert_eq!(inc[0].total_bytes, 400);
    assert!(inc[0].metadata_received);

    let mut starts = Vec::new();
    let dest = ground.incoming_path(SAT, "camera", "r.raw");
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut |p| {
            if let Some(s) = is_data(p) {
                starts.push(s);
            }
            Fate::Deliver
        },
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not resume");

    assert_eq!(starts, vec![400, 500, 600, 700, 800, 900]);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

/// Only the receiver restarts; the sender never notices.
#[test]
fn test_receiver_restart_keeps_received_data() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(1000);
    sat.stage(GROUND, "camera", "g.raw", &content).unwrap();

    partial_transfer(&mut sat, &mut ground, 4);
    let mut ground = ground.restart().unwrap();
    assert_eq!(ground.engine.list_incoming()[0].total_bytes, 400);

    let mut starts = Vec::new();
    let dest = ground.incoming_path(SAT, "camera", "g.raw");
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut |p| {
            if let Some(s) = is_data(p) {
                starts.push(s);
            }
            Fate::Deliver
        },
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    )
    .expect("transfer did not finish");

    assert_eq!(starts, vec![400, 500, 600, 700, 800, 900]);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

/// A source file that changes size while queued is requeued from scratch.
#[test]
fn test_source_changed_while_down_is_dropped() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    sat.stage(GROUND, "camera", "s.raw", &pattern(1000)).unwrap();
    partial_transfer(&mut sat, &mut ground, 2);

    let source = sat.root.path().join(GROUND).join("outgoing/camera/s.raw");
    std::fs::write(&source, pattern(300)).unwrap();

    let sat = sat.restart().unwrap();
    // the stale checkpoint is discarded at restore
    assert!(sat.engine.list_outgoing().is_empty());
}
