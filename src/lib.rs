#![warn(missing_debug_implementations)]
#![warn(unreachable_pub)]

//! One-sided global-memory communication for a PGAS runtime.
//!
//! A process taking part in the runtime is a *unit*. Units read, write and atomically update
//! memory that lives on other units through [GlobalPointer]s, without the owning unit running
//! any code to service the request.
//!
//! Every operation goes through the same pipeline:
//! - the global pointer is resolved against the caller's [TeamRegistry] into a transport target
//!   (window, rank, displacement),
//! - the locality selector decides whether the target is the calling unit itself, a unit sharing
//!   physical memory with it, or a genuinely remote unit,
//! - transfers that exceed the transport's countable limit are split into a bulk call using a
//!   composite datatype plus a remainder call.
//!
//! Blocking calls return once the data is usable by the caller. Non-blocking calls return a
//! [Handle] that is later completed with [Handle::wait], [Handle::wait_local], [Handle::test_local]
//! or one of the batched variants ([wait_all], [wait_all_local], [test_all_local]).
//! Writes only become visible to other units after a remote-completion step
//! ([GlobalComm::flush], [GlobalComm::flush_all] or [Handle::wait]).
//!
//! The transport is abstracted behind a set of `Comm*` traits dispatched over one enum of
//! backends. The crate ships an in-process fabric
//! ([LocalFabric]) that simulates any number of units, their node topology, deferred remote
//! completion and collective rendezvous, so the whole layer can be driven from ordinary threads.
//!
//! # Example
//! ```ignore
//! use pgas_comm::*;
//!
//! let fabric = LocalBuilder::new(2).max_contig_elements(1024).build();
//! let comms = fabric.init_world(4096, 4096)?;
//! std::thread::scope(|s| {
//!     for comm in &comms {
//!         s.spawn(move || {
//!             let peer = (comm.my_unit() + 1) % comm.num_units();
//!             let gptr = GlobalPointer::new(TeamId::ALL, SegmentId::LOCAL_POOL, peer, 0);
//!             comm.put_blocking(gptr, &[comm.my_unit() as u64])?;
//!             comm.barrier(TeamId::ALL)?;
//!             let mut val = [0u64];
//!             comm.get(&mut val, gptr.with_unit(comm.my_unit()))?;
//!             Ok::<(), RmaError>(())
//!         });
//!     }
//! });
//! ```

pub(crate) mod collective;
pub(crate) mod datatype;
pub(crate) mod env_var;
pub(crate) mod global_pointer;
pub(crate) mod lamellae;
pub(crate) mod memregion;
pub(crate) mod rma;
pub(crate) mod team;
pub(crate) mod warnings;

pub use crate::datatype::{Datatype, Dist, Operation, UserOp};
pub use crate::env_var::{config, Config};
pub use crate::global_pointer::{Displacement, GlobalPointer, SegmentId, TeamId};
pub use crate::lamellae::{
    Backend, CommId, ErrorKind, FabricError, FabricResult, LocalBuilder, LocalFabric, RequestId,
    RmaError, RmaResult, StatsSnapshot, Window,
};
pub use crate::memregion::{BasePtr, MemRegion};
pub use crate::rma::handle::{test_all_local, wait_all, wait_all_local, Handle};
pub use crate::rma::GlobalComm;
pub use crate::team::{LocalPeer, SegmentEntry, SegmentTable, TeamContext, TeamRegistry};

#[doc(hidden)]
pub use tracing;
