use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Clean-link transfers
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_single_file_transfer() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let content = pattern(1000);
    sat.stage(GROUND, "camera", "img_0001.raw", &content).unwrap();

    let dest = ground.incoming_path(SAT, "camera", "img_0001.raw");
    let rounds = run_until(
        &mut sat,
        &mut ground,
        40,
        &mut deliver_all,
        &mut deliver_all,
        |s, g| transfer_finished(s, g, &dest),
    );
    assert!(rounds.is_some(), "transfer did not finish");
    assert_eq!(std::fs::read(&dest).unwrap(), content);

    // source removed once confirmed, staging area empty on both sides
    let source = sat.root.path().join(GROUND).join("outgoing/camera/img_0001.raw");
    assert!(!source.exists());
    assert_eq!(std::fs::read_dir(ground.temp_dir(SAT)).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(sat.temp_dir(GROUND)).unwrap().count(), 0);
}

#[test]
fn test_each_chunk_sent_once_on_clean_link() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    sat.stage(GROUND, "camera", "a.raw", &pattern(1000)).unwrap();

    let mut starts = Vec::new();
    let dest = ground.incoming_path(SAT, "camera", "a.raw");
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

    assert_eq!(starts, (0..10).map(|i| i * 100).collect::<Vec<u64>>());
}

#[test]
fn test_files_in_both_directions() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    let down = pattern(450);
    let up: Vec<u8> = b"uplink command table".repeat(20);
    sat.stage(GROUND, "telemetry", "hk.bin", &down).unwrap();
    ground.stage(SAT, "ops", "cmd.tbl", &up).unwrap();

    let at_ground = ground.incoming_path(SAT, "telemetry", "hk.bin");
    let at_sat = sat.incoming_path(GROUND, "ops", "cmd.tbl");
    run_until(
        &mut sat,
        &mut ground,
        60,
        &mut deliver_all,
        &mut deliver_all,
        |s, g| {
            at_ground.exists()
                && at_sat.exists()
                && s.engine.list_outgoing().is_empty()
                && g.engine.list_outgoing().is_empty()
        },
    )
    .expect("transfers did not finish");

    assert_eq!(std::fs::read(&at_ground).unwrap(), down);
    assert_eq!(std::fs::read(&at_sat).unwrap(), up);
}

#[test]
fn test_disabled_files_wait_for_enable() {
    let mut sat = Node::new(SAT).unwrap();
    let mut ground = Node::new(GROUND).unwrap();
    sat.stage(GROUND, "camera", "big.raw", &pattern(800)).unwrap();
    sat.stage(GROUND, "camera", "urgent.raw", &pattern(120)).unwrap();
    assert_eq!(sat.engine.enable_single(GROUND, "urgent.raw").unwrap(), 1);

    let urgent = ground.incoming_path(SAT, "camera", "urgent.raw");
    let big = ground.incoming_path(SAT, "camera", "big.raw");
    run_until(
        &mut sat,
        &mut ground,
        30,
        &mut deliver_all,
        &mut deliver_all,
        |_, _| urgent.exists(),
    )
    .expect("urgent file did not arrive");
    assert!(!big.exists());

    sat.engine.enable_all(GROUND).unwrap();
    run_until(
        &mut sat,
        &mut ground,
        40,
        &mut deliver_all,
        &mut deliver_all,
        |_, _| big.exists(),
    )
    .expect("big file did not arrive after enable_all");
    assert_eq!(std::fs::read(&big).unwrap(), pattern(800));
}
