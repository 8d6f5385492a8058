#![allow(dead_code)]

use pgas_comm::*;

use std::sync::Arc;

pub const POOL_BYTES: usize = 4096;
pub const HEAP_BYTES: usize = 4096;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A world of `units` units, each on its own simulated node.
pub fn world(units: usize, max_contig: usize) -> (Arc<LocalFabric>, Vec<GlobalComm>) {
    world_with(LocalBuilder::new(units).units_per_node(1).max_contig_elements(max_contig))
}

pub fn world_with(builder: LocalBuilder) -> (Arc<LocalFabric>, Vec<GlobalComm>) {
    init_logging();
    let fabric = builder.build();
    let comms = fabric
        .init_world(POOL_BYTES, HEAP_BYTES)
        .expect("world initialization");
    (fabric, comms)
}

/// Run `f` on every unit, one thread per unit.
pub fn run_units<F>(comms: &[GlobalComm], f: F)
where
    F: Fn(&GlobalComm) + Sync,
{
    std::thread::scope(|s| {
        for comm in comms {
            let f = &f;
            s.spawn(move || f(comm));
        }
    });
}

pub fn pool_ptr(unit: usize, offset: u64) -> GlobalPointer {
    GlobalPointer::new(TeamId::ALL, SegmentId::LOCAL_POOL, unit, offset)
}

/// Window backing the local allocation pools.
pub fn pool_window(comm: &GlobalComm) -> Window {
    comm.teams()
        .resolve(TeamId::ALL)
        .expect("all-units team")
        .local_window()
}

/// Window backing the collective segments of the all-units team.
pub fn heap_window(comm: &GlobalComm) -> Window {
    comm.teams()
        .resolve(TeamId::ALL)
        .expect("all-units team")
        .window()
}

/// Elements of `unit`'s pool as stored at the target, ignoring anything still queued.
pub fn pool_contents<T: Dist + Default>(
    fabric: &LocalFabric,
    comm: &GlobalComm,
    unit: usize,
    offset: usize,
    count: usize,
) -> Vec<T> {
    fabric
        .region(pool_window(comm), unit)
        .expect("pool region")
        .read_elems::<T>(offset, count)
        .expect("in bounds")
}
