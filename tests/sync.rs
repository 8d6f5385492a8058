mod common;

use common::*;
use pgas_comm::*;
use serial_test::serial;

const MAX: usize = 8;

fn segment_ptr(segment: SegmentId, unit: usize, offset: u64) -> GlobalPointer {
    GlobalPointer::new(TeamId::ALL, segment, unit, offset)
}

#[test]
#[serial]
fn flush_without_outstanding_operations_changes_nothing() {
    let (fabric, comms) = world(2, MAX);
    let before = comms[0].stats();
    comms[0].flush(pool_ptr(1, 0)).expect("flush");
    let delta = comms[0].stats().since(&before);
    assert_eq!(delta.flushes, 1);
    assert_eq!(delta.probes, 1);
    assert_eq!(delta.transfers(), 0);
    assert_eq!(fabric.pending_operations(0), 0);
    assert_eq!(pool_contents::<u64>(&fabric, &comms[0], 1, 0, 4), vec![0; 4]);
}

#[test]
#[serial]
fn flush_local_leaves_writes_unpublished() {
    let (fabric, comms) = world(2, MAX);
    let gptr = pool_ptr(1, 64);
    comms[0].put(gptr, &[7u32, 8, 9]).expect("put");
    assert_eq!(fabric.pending_operations(0), 1);

    let before = comms[0].stats();
    comms[0].flush_local(gptr).expect("flush local");
    let delta = comms[0].stats().since(&before);
    assert_eq!(delta.local_flushes, 1);
    assert_eq!(delta.flushes, 0);
    assert_eq!(delta.probes, 1);
    assert_eq!(fabric.pending_operations(0), 1);
    assert_eq!(pool_contents::<u32>(&fabric, &comms[0], 1, 64, 3), vec![0; 3]);

    comms[0].flush(gptr).expect("flush");
    assert_eq!(fabric.pending_operations(0), 0);
    assert_eq!(
        pool_contents::<u32>(&fabric, &comms[0], 1, 64, 3),
        vec![7, 8, 9]
    );
}

#[test]
#[serial]
fn flush_only_completes_the_addressed_unit() {
    let (fabric, comms) = world(3, MAX);
    comms[0].put(pool_ptr(1, 0), &[1i16; 5]).expect("put");
    comms[0].put(pool_ptr(2, 0), &[2i16; 5]).expect("put");
    assert_eq!(fabric.pending_operations(0), 2);

    comms[0].flush(pool_ptr(1, 0)).expect("flush");
    assert_eq!(fabric.pending_operations(0), 1);
    assert_eq!(pool_contents::<i16>(&fabric, &comms[0], 1, 0, 5), vec![1; 5]);
    assert_eq!(pool_contents::<i16>(&fabric, &comms[0], 2, 0, 5), vec![0; 5]);
}

#[test]
#[serial]
fn flush_all_completes_every_target_of_the_window() {
    let (fabric, comms) = world(4, MAX);
    for unit in 1..4 {
        comms[0]
            .put(pool_ptr(unit, 8), &[unit as u8; 3])
            .expect("put");
    }
    assert_eq!(fabric.pending_operations(0), 3);

    let before = comms[0].stats();
    // the unit of the pointer does not matter
    comms[0].flush_all(pool_ptr(2, 0)).expect("flush all");
    let delta = comms[0].stats().since(&before);
    assert_eq!(delta.flushes, 1);
    assert_eq!(delta.probes, 1);
    assert_eq!(fabric.pending_operations(0), 0);
    for unit in 1..4 {
        assert_eq!(
            pool_contents::<u8>(&fabric, &comms[0], unit, 8, 3),
            vec![unit as u8; 3]
        );
    }
}

#[test]
#[serial]
fn flush_local_all_keeps_writes_pending() {
    let (fabric, comms) = world(3, MAX);
    comms[0].put(pool_ptr(1, 0), &[3.0f64; 2]).expect("put");
    comms[0].put(pool_ptr(2, 0), &[4.0f64; 2]).expect("put");
    let before = comms[0].stats();
    comms[0].flush_local_all(pool_ptr(0, 0)).expect("flush local all");
    let delta = comms[0].stats().since(&before);
    assert_eq!(delta.local_flushes, 1);
    assert_eq!(delta.flushes, 0);
    assert_eq!(fabric.pending_operations(0), 2);
}

#[test]
#[serial]
fn flushes_are_scoped_to_the_segment_window() {
    let (fabric, comms) = world(2, MAX);
    let disps = [Displacement::new(128), Displacement::new(256)];
    fabric
        .publish_segment(TeamId::ALL, SegmentId(1), &disps)
        .expect("publish");
    let seg = segment_ptr(SegmentId(1), 1, 16);
    comms[0].put(seg, &[5u64, 6]).expect("segment put");
    comms[0].put(pool_ptr(1, 0), &[9u64]).expect("pool put");
    assert_eq!(fabric.pending_operations(0), 2);

    comms[0].flush(seg).expect("flush segment");
    assert_eq!(fabric.pending_operations(0), 1);
    let heap = fabric
        .region(heap_window(&comms[0]), 1)
        .expect("heap region")
        .read_elems::<u64>(256 + 16, 2)
        .expect("in bounds");
    assert_eq!(heap, vec![5, 6]);
    assert_eq!(pool_contents::<u64>(&fabric, &comms[0], 1, 0, 1), vec![0]);

    comms[0].flush_all(segment_ptr(SegmentId::LOCAL_POOL, 0, 0)).expect("flush pool");
    assert_eq!(fabric.pending_operations(0), 0);
    assert_eq!(pool_contents::<u64>(&fabric, &comms[0], 1, 0, 1), vec![9]);
}

#[test]
#[serial]
fn flush_of_an_unknown_team_is_rejected_before_the_transport() {
    let (_fabric, comms) = world(2, MAX);
    let before = comms[0].stats();
    let err = comms[0]
        .flush(GlobalPointer::new(TeamId(7), SegmentId::LOCAL_POOL, 0, 0))
        .expect_err("unknown team");
    assert!(matches!(err, RmaError::UnknownTeam(TeamId(7))));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = comms[0]
        .flush_local_all(segment_ptr(SegmentId(4), 0, 0))
        .expect_err("unknown segment");
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(comms[0].stats().since(&before), StatsSnapshot::default());
}
