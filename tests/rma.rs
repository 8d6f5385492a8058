mod common;

use common::*;
use pgas_comm::*;
use serial_test::serial;

const MAX: usize = 4;

macro_rules! round_trip_test {
    ($elem:ty, $len:expr) => {
        paste::paste! {
            #[test]
            #[serial]
            #[allow(non_snake_case)]
            fn [<round_trip_ $elem _ $len>]() {
                let (_fabric, comms) = world(2, MAX);
                run_units(&comms, |comm| {
                    let me = comm.my_unit();
                    let peer = (me + 1) % comm.num_units();
                    let src = (0..$len)
                        .map(|i| ((i * 7 + me * 3) % 100) as $elem)
                        .collect::<Vec<$elem>>();
                    let gptr = pool_ptr(peer, (me * 512) as u64);
                    comm.put(gptr, &src).expect("put");
                    comm.flush(gptr).expect("flush");
                    let mut dst = vec![<$elem>::default(); $len];
                    comm.get(&mut dst, gptr).expect("get");
                    assert_eq!(dst, src);
                });
            }
        }
    };
}

macro_rules! round_trip_lens {
    ($elem:ty, ($($len:expr),*)) => {
        $(round_trip_test!($elem, $len);)*
    };
}

macro_rules! round_trip_tests {
    (($($elem:ty),*), $lens:tt) => {
        $(round_trip_lens!($elem, $lens);)*
    };
}

// 0, 1, the limit, one past it and k * limit + r
round_trip_tests!((u8, i16, u32, i64, f32, f64), (0, 1, 4, 5, 11, 16));

#[test]
#[serial]
fn chunk_boundaries_issue_bulk_and_remainder_calls() {
    let (_fabric, comms) = world(2, MAX);
    let comm = &comms[0];
    for (k, r) in [(0, 0), (0, 3), (1, 0), (1, 1), (2, 3), (4, 0)] {
        let nelem = k * MAX + r;
        let src = vec![7u32; nelem];
        let before = comm.stats();
        comm.put(pool_ptr(1, 0), &src).expect("put");
        let puts = comm.stats().since(&before);
        assert_eq!(puts.puts, (k > 0) as usize + (r > 0) as usize, "n = {nelem}");
        assert_eq!(puts.chunked, (k > 0) as usize, "n = {nelem}");
        assert_eq!(puts.bytes, nelem * 4, "n = {nelem}");

        let mut dst = vec![0u32; nelem];
        let before = comm.stats();
        comm.get(&mut dst, pool_ptr(1, 0)).expect("get");
        let gets = comm.stats().since(&before);
        assert_eq!(gets.gets, (k > 0) as usize + (r > 0) as usize, "n = {nelem}");
        assert_eq!(gets.bytes, nelem * 4, "n = {nelem}");
    }
}

#[test]
#[serial]
fn unrepresentable_count_is_rejected_before_issue() {
    let (fabric, comms) = world(2, MAX);
    let comm = &comms[0];
    let src = vec![1u8; MAX * MAX + MAX];
    let before = comm.stats();
    let err = comm.put(pool_ptr(1, 0), &src).unwrap_err();
    assert!(matches!(err, RmaError::CountTooLarge { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let mut dst = vec![0u8; MAX * (MAX + 1)];
    assert!(comm.get_handle(&mut dst, pool_ptr(1, 0)).is_err());
    assert_eq!(comm.stats().since(&before).transfers(), 0);
    assert_eq!(fabric.outstanding_requests(0), 0);
}

#[test]
#[serial]
fn self_transfers_bypass_the_transport() {
    let (fabric, comms) = world(2, MAX);
    let comm = &comms[1];
    let src = (0..11u64).collect::<Vec<_>>();
    let gptr = pool_ptr(1, 64);
    let before = comm.stats();
    comm.put(gptr, &src).expect("put");
    // visible without any flush
    assert_eq!(pool_contents::<u64>(&fabric, comm, 1, 64, 11), src);
    let mut dst = vec![0u64; 11];
    comm.get(&mut dst, gptr).expect("get");
    assert_eq!(dst, src);
    let mut dst = vec![0u64; 11];
    let handle = comm.get_handle(&mut dst, gptr).expect("get handle");
    assert!(handle.is_null());
    drop(handle);
    assert_eq!(dst, src);
    let handle = comm.put_handle(gptr, &src).expect("put handle");
    assert!(handle.is_null());
    assert_eq!(comm.stats().since(&before), StatsSnapshot::default());
}

#[test]
#[serial]
fn self_transfers_to_collective_segments() {
    let (fabric, comms) = world(2, MAX);
    let disps = [Displacement::new(128), Displacement::new(256)];
    fabric
        .publish_segment(TeamId::ALL, SegmentId(1), &disps)
        .expect("publish");
    let comm = &comms[1];
    let gptr = GlobalPointer::new(TeamId::ALL, SegmentId(1), 1, 8);
    let before = comm.stats();
    comm.put(gptr, &[5i32, 6, 7]).expect("put");
    assert_eq!(comm.stats().since(&before).transfers(), 0);
    let stored = fabric
        .region(heap_window(comm), 1)
        .expect("heap")
        .read_elems::<i32>(256 + 8, 3)
        .expect("in bounds");
    assert_eq!(stored, vec![5, 6, 7]);
}

#[test]
#[serial]
fn shared_memory_peers_are_copied_directly() {
    let (fabric, comms) = world_with(
        LocalBuilder::new(4)
            .units_per_node(2)
            .max_contig_elements(MAX),
    );
    let comm = &comms[0].clone().with_shared_windows(true);
    let src = [1u16, 2, 3, 4, 5, 6];

    // unit 1 shares unit 0's node
    let before = comm.stats();
    comm.put(pool_ptr(1, 32), &src).expect("put");
    assert_eq!(comm.stats().since(&before).transfers(), 0);
    assert_eq!(pool_contents::<u16>(&fabric, comm, 1, 32, 6), src.to_vec());
    let mut dst = [0u16; 6];
    let handle = comm.get_handle(&mut dst, pool_ptr(1, 32)).expect("get");
    assert!(handle.is_null());
    drop(handle);
    assert_eq!(dst, src);

    // unit 2 lives on the other node
    let before = comm.stats();
    comm.put(pool_ptr(2, 32), &src).expect("put");
    assert_eq!(comm.stats().since(&before).puts, 2);
    assert_eq!(fabric.pending_operations(0), 2);

    // disabling shared windows routes node-local peers through the transport
    let remote_only = comm.clone().with_shared_windows(false);
    let before = remote_only.stats();
    remote_only.put_blocking(pool_ptr(1, 64), &src).expect("put");
    assert_eq!(remote_only.stats().since(&before).puts, 2);
    assert_eq!(pool_contents::<u16>(&fabric, comm, 1, 64, 6), src.to_vec());
}

#[test]
#[serial]
fn shared_memory_segments_use_segment_base_pointers() {
    let (fabric, comms) = world_with(LocalBuilder::new(2).units_per_node(2));
    let disps = [Displacement::new(0), Displacement::new(1024)];
    fabric
        .publish_segment(TeamId::ALL, SegmentId(3), &disps)
        .expect("publish");
    let comm = &comms[0].clone().with_shared_windows(true);
    let gptr = GlobalPointer::new(TeamId::ALL, SegmentId(3), 1, 16);
    let before = comm.stats();
    comm.put(gptr, &[9u8; 10]).expect("put");
    assert_eq!(comm.stats().since(&before).transfers(), 0);
    let stored = fabric
        .region(heap_window(comm), 1)
        .expect("heap")
        .read_elems::<u8>(1024 + 16, 10)
        .expect("in bounds");
    assert_eq!(stored, vec![9u8; 10]);
}

#[test]
#[serial]
fn remote_segments_add_the_unit_displacement() {
    let (fabric, comms) = world(2, MAX);
    let disps = [Displacement::new(64), Displacement::new(512)];
    fabric
        .publish_segment(TeamId::ALL, SegmentId(2), &disps)
        .expect("publish");
    let gptr = GlobalPointer::new(TeamId::ALL, SegmentId(2), 1, 4);
    comms[0].put_blocking(gptr, &[1u32, 2, 3, 4, 5]).expect("put");
    let stored = fabric
        .region(heap_window(&comms[0]), 1)
        .expect("heap")
        .read_elems::<u32>(512 + 4, 5)
        .expect("in bounds");
    assert_eq!(stored, vec![1, 2, 3, 4, 5]);
    fabric
        .retire_segment(TeamId::ALL, SegmentId(2))
        .expect("retire");
    let err = comms[0].put(gptr, &[1u32]).unwrap_err();
    assert!(matches!(err, RmaError::UnknownSegment { .. }));
}

#[test]
#[serial]
fn out_of_range_units_fail_without_transport_calls() {
    let (fabric, comms) = world(2, MAX);
    let comm = &comms[0];
    let before = comm.stats();
    let bad = pool_ptr(2, 0);
    let mut buf = [0u8; 4];
    for err in [
        comm.get(&mut buf, bad).unwrap_err(),
        comm.put(bad, &buf).unwrap_err(),
        comm.put_blocking(bad, &buf).unwrap_err(),
        comm.accumulate(bad, &buf, &Operation::Sum).unwrap_err(),
        comm.fetch_and_op(bad, 1u8, &Operation::Sum).unwrap_err(),
        comm.compare_and_swap(bad, 1u8, 0).unwrap_err(),
        comm.put_handle(bad, &buf).unwrap_err(),
        comm.flush(bad).unwrap_err(),
        comm.flush_local(bad).unwrap_err(),
    ] {
        assert!(matches!(err, RmaError::UnitOutOfRange { unit: 2, size: 2 }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    let unknown = GlobalPointer::new(TeamId(9), SegmentId::LOCAL_POOL, 0, 0);
    assert!(matches!(
        comm.get(&mut buf, unknown),
        Err(RmaError::UnknownTeam(TeamId(9)))
    ));
    assert!(matches!(
        comm.flush_all(unknown),
        Err(RmaError::UnknownTeam(TeamId(9)))
    ));
    assert_eq!(comm.stats().since(&before), StatsSnapshot::default());
    assert_eq!(fabric.outstanding_requests(0), 0);
}

#[test]
#[serial]
fn transport_failures_are_operation_failed() {
    let (_fabric, comms) = world(2, MAX);
    let past_end = pool_ptr(1, (POOL_BYTES - 2) as u64);
    let err = comms[0].put(past_end, &[1u32]).unwrap_err();
    assert!(matches!(err, RmaError::Fabric(FabricError::OutOfBounds { .. })));
    assert_eq!(err.kind(), ErrorKind::OperationFailed);
    assert!(std::error::Error::source(&err).is_some());
}

#[test]
#[serial]
fn chunked_put_past_the_end_writes_nothing() {
    let (fabric, comms) = world(2, MAX);
    // the bulk piece of 4 bytes fits, the remainder of 2 does not
    let near_end = pool_ptr(1, (POOL_BYTES - 5) as u64);
    let src = [7u8; 6];

    let err = comms[0].put(near_end, &src).unwrap_err();
    assert!(matches!(err, RmaError::Fabric(FabricError::OutOfBounds { .. })));
    let err = comms[0].put_blocking(near_end, &src).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailed);
    assert!(comms[0].put_handle(near_end, &src).is_err());
    assert!(matches!(
        comms[0].accumulate(near_end, &src, &Operation::Sum),
        Err(RmaError::Fabric(FabricError::OutOfBounds { .. }))
    ));
    assert_eq!(fabric.pending_operations(0), 0);
    assert_eq!(fabric.outstanding_requests(0), 0);

    comms[0].flush_all(near_end).expect("flush");
    assert_eq!(
        pool_contents::<u8>(&fabric, &comms[0], 1, POOL_BYTES - 5, 5),
        vec![0; 5]
    );
}

#[test]
#[serial]
fn chunked_get_past_the_end_leaves_no_requests() {
    let (fabric, comms) = world(2, MAX);
    let near_end = pool_ptr(1, (POOL_BYTES - 5) as u64);
    let mut dst = [0u8; 6];
    assert!(comms[0].get(&mut dst, near_end).is_err());
    assert!(comms[0].get_handle(&mut dst, near_end).is_err());
    assert_eq!(fabric.outstanding_requests(0), 0);
}

#[test]
#[serial]
fn huge_offsets_are_rejected_without_panicking() {
    let (fabric, comms) = world(2, MAX);
    let disps = [Displacement::new(128), Displacement::new(256)];
    fabric
        .publish_segment(TeamId::ALL, SegmentId(1), &disps)
        .expect("publish");
    let before = comms[0].stats();

    let seg = GlobalPointer::new(TeamId::ALL, SegmentId(1), 1, u64::MAX - 8);
    let err = comms[0].get(&mut [0u8; 4], seg).unwrap_err();
    assert!(matches!(err, RmaError::OffsetOutOfRange { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = comms[0].put(seg + 64, &[1u8; 4]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(comms[0].stats().since(&before), StatsSnapshot::default());

    let pool = pool_ptr(1, u64::MAX);
    assert!(comms[0].get(&mut [0u8; 4], pool).is_err());
    assert!(comms[0].put(pool, &[1u8; 4]).is_err());
    assert_eq!(fabric.pending_operations(0), 0);
    assert_eq!(fabric.outstanding_requests(0), 0);
}

#[test]
#[serial]
fn huge_offsets_on_the_shared_route_are_rejected() {
    let (_fabric, comms) =
        world_with(LocalBuilder::new(2).units_per_node(2).max_contig_elements(MAX));
    let pool = pool_ptr(1, u64::MAX - 1);
    assert!(comms[0].get(&mut [0u8; 4], pool).is_err());
    assert!(comms[0].put(pool, &[1u8; 4]).is_err());
}

#[test]
#[serial]
fn accumulate_combines_contributions_of_every_unit() {
    let (fabric, comms) = world(4, MAX);
    let target = pool_ptr(0, 128);
    run_units(&comms, |comm| {
        let me = comm.my_unit() as i64;
        let src = (0..6).map(|i| i + me).collect::<Vec<i64>>();
        comm.accumulate(target, &src, &Operation::Sum).expect("accumulate");
        comm.flush(target).expect("flush");
        comm.barrier(TeamId::ALL).expect("barrier");
    });
    let expected = (0..6).map(|i| 4 * i + 6).collect::<Vec<i64>>();
    assert_eq!(pool_contents::<i64>(&fabric, &comms[0], 0, 128, 6), expected);
    // accumulates to the calling unit itself go through the transport as well
    assert!(comms[0].stats().accumulates > 0);
}

#[test]
#[serial]
fn accumulate_is_only_visible_after_flush() {
    let (fabric, comms) = world(2, MAX);
    let target = pool_ptr(1, 0);
    comms[0]
        .accumulate(target, &[3u32, 3, 3], &Operation::Max)
        .expect("accumulate");
    assert_eq!(pool_contents::<u32>(&fabric, &comms[0], 1, 0, 3), vec![0, 0, 0]);
    comms[0].flush(target).expect("flush");
    assert_eq!(pool_contents::<u32>(&fabric, &comms[0], 1, 0, 3), vec![3, 3, 3]);
}

#[test]
#[serial]
fn unsupported_operations_are_invalid_arguments() {
    let (_fabric, comms) = world(2, MAX);
    let comm = &comms[0];
    let gptr = pool_ptr(1, 0);
    let user = Operation::User(UserOp::new("first", |_, _, _| {}));
    for err in [
        comm.accumulate(gptr, &[1.0f64], &Operation::BitAnd).unwrap_err(),
        comm.accumulate(gptr, &[1u32], &user).unwrap_err(),
        comm.fetch_and_op(gptr, 1.0f32, &Operation::LogicalOr).unwrap_err(),
        comm.compare_and_swap(gptr, 1.0f64, 0.0).unwrap_err(),
    ] {
        assert!(matches!(err, RmaError::UnsupportedDatatype { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert_eq!(comm.stats().transfers(), 0);
}

#[test]
#[serial]
fn fetch_and_op_is_atomic_across_units() {
    let (fabric, comms) = world(4, MAX);
    let counter = pool_ptr(0, 0);
    run_units(&comms, |comm| {
        for _ in 0..25 {
            comm.fetch_and_op(counter, 1u64, &Operation::Sum)
                .expect("fetch_and_op");
        }
        comm.barrier(TeamId::ALL).expect("barrier");
    });
    assert_eq!(pool_contents::<u64>(&fabric, &comms[0], 0, 0, 1), vec![100]);
    let old = comms[2]
        .fetch_and_op(counter, 0u64, &Operation::NoOp)
        .expect("read");
    assert_eq!(old, 100);
}

#[test]
#[serial]
fn fetch_and_op_orders_after_pending_writes() {
    let (_fabric, comms) = world(2, MAX);
    let gptr = pool_ptr(1, 8);
    comms[0].put(gptr, &[40i32]).expect("put");
    let old = comms[0]
        .fetch_and_op(gptr, 2i32, &Operation::Sum)
        .expect("fetch_and_op");
    assert_eq!(old, 40);
    let old = comms[0]
        .fetch_and_op(gptr, 7i32, &Operation::Replace)
        .expect("fetch_and_op");
    assert_eq!(old, 42);
}

#[test]
#[serial]
fn compare_and_swap_elects_one_winner() {
    let (fabric, comms) = world(4, MAX);
    let lock = pool_ptr(3, 16);
    let winners = std::sync::atomic::AtomicUsize::new(0);
    run_units(&comms, |comm| {
        let me = comm.my_unit() as u32 + 1;
        let old = comm.compare_and_swap(lock, me, 0u32).expect("cas");
        if old == 0 {
            winners.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        comm.barrier(TeamId::ALL).expect("barrier");
    });
    assert_eq!(winners.into_inner(), 1);
    let stored = pool_contents::<u32>(&fabric, &comms[0], 3, 16, 1)[0];
    assert!((1..=4).contains(&stored));
}
