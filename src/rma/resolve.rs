use crate::global_pointer::GlobalPointer;
use crate::lamellae::{CommId, RemoteAddr, RmaError, RmaResult, Window};
use crate::team::{SegmentEntry, TeamContext, TeamRegistry};

use std::sync::Arc;

/// A global pointer decoded into its transport address.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) gptr: GlobalPointer,
    pub(crate) team: Arc<TeamContext>,
    /// `None` for the local allocation pool
    pub(crate) segment: Option<Arc<SegmentEntry>>,
    pub(crate) addr: RemoteAddr,
    /// communication domain of `addr.window`
    pub(crate) comm: CommId,
}

impl Target {
    pub(crate) fn is_self(&self) -> bool {
        self.gptr.unit() == self.team.my_unit()
    }
}

fn lookup_team(teams: &TeamRegistry, gptr: &GlobalPointer) -> RmaResult<Arc<TeamContext>> {
    teams
        .resolve(gptr.team())
        .ok_or(RmaError::UnknownTeam(gptr.team()))
}

/// Window and domain backing the segment of `gptr`, without looking at its unit.
pub(crate) fn resolve_window(
    teams: &TeamRegistry,
    gptr: &GlobalPointer,
) -> RmaResult<(Window, CommId)> {
    let team = lookup_team(teams, gptr)?;
    if gptr.segment().is_local_pool() {
        Ok((team.local_window(), team.world()))
    } else if team.segments().lookup(gptr.segment()).is_some() {
        Ok((team.window(), team.comm()))
    } else {
        Err(RmaError::UnknownSegment {
            team: gptr.team(),
            segment: gptr.segment(),
        })
    }
}

/// Decode `gptr` into the window, rank and displacement a transport call targets.
///
/// The local allocation pool is addressed through the world-wide local window, so the team
/// relative unit is translated to its global id. Collective segments live in the team window at
/// the unit's segment displacement.
pub(crate) fn resolve(teams: &TeamRegistry, gptr: GlobalPointer) -> RmaResult<Target> {
    let team = lookup_team(teams, &gptr)?;
    let unit = gptr.unit();
    if unit >= team.size() {
        return Err(RmaError::UnitOutOfRange {
            unit,
            size: team.size(),
        });
    }
    let unknown_segment = || RmaError::UnknownSegment {
        team: gptr.team(),
        segment: gptr.segment(),
    };
    if gptr.segment().is_local_pool() {
        let rank = team
            .global_unit(unit)
            .ok_or(RmaError::UnitOutOfRange {
                unit,
                size: team.size(),
            })?;
        let addr = RemoteAddr {
            rank,
            window: team.local_window(),
            disp: crate::global_pointer::Displacement::new(gptr.offset()),
        };
        let comm = team.world();
        Ok(Target {
            gptr,
            team,
            segment: None,
            addr,
            comm,
        })
    } else {
        let entry = team
            .segments()
            .lookup(gptr.segment())
            .ok_or_else(unknown_segment)?;
        let disp = entry
            .disp(unit)
            .ok_or_else(unknown_segment)?
            .checked_add(gptr.offset())
            .ok_or(RmaError::OffsetOutOfRange {
                offset: gptr.offset(),
            })?;
        let addr = RemoteAddr {
            rank: unit,
            window: team.window(),
            disp,
        };
        let comm = team.comm();
        Ok(Target {
            gptr,
            team,
            segment: Some(entry),
            addr,
            comm,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_pointer::{Displacement, SegmentId, TeamId};
    use crate::team::TeamContext;

    fn registry() -> TeamRegistry {
        let registry = TeamRegistry::new();
        registry.register(TeamContext::new(
            TeamId(2),
            CommId(5),
            Window(7),
            Window(1),
            CommId::WORLD,
            0,
            vec![4, 6, 9],
            vec![None, None, None],
        ));
        registry
            .resolve(TeamId(2))
            .expect("registered")
            .segments()
            .publish(
                SegmentId(3),
                SegmentEntry::new(
                    vec![
                        Displacement::new(0),
                        Displacement::new(256),
                        Displacement::new(512),
                    ],
                    vec![],
                ),
            );
        registry
    }

    #[test]
    fn local_pool_uses_global_unit() {
        let registry = registry();
        let target = resolve(&registry, GlobalPointer::new(TeamId(2), SegmentId(0), 2, 40))
            .expect("resolves");
        assert_eq!(target.addr.rank, 9);
        assert_eq!(target.addr.window, Window(1));
        assert_eq!(target.addr.disp, Displacement::new(40));
        assert_eq!(target.comm, CommId::WORLD);
        assert!(target.segment.is_none());
    }

    #[test]
    fn segment_adds_displacement() {
        let registry = registry();
        let target = resolve(&registry, GlobalPointer::new(TeamId(2), SegmentId(3), 1, 8))
            .expect("resolves");
        assert_eq!(target.addr.rank, 1);
        assert_eq!(target.addr.window, Window(7));
        assert_eq!(target.addr.disp, Displacement::new(264));
        assert_eq!(target.comm, CommId(5));
        assert!(!target.is_self());
    }

    #[test]
    fn invalid_arguments() {
        let registry = registry();
        let out_of_range = resolve(&registry, GlobalPointer::new(TeamId(2), SegmentId(3), 3, 0));
        assert!(matches!(
            out_of_range,
            Err(RmaError::UnitOutOfRange { unit: 3, size: 3 })
        ));
        let unknown_team = resolve(&registry, GlobalPointer::new(TeamId(8), SegmentId(3), 0, 0));
        assert!(matches!(unknown_team, Err(RmaError::UnknownTeam(TeamId(8)))));
        let unknown_seg = resolve(&registry, GlobalPointer::new(TeamId(2), SegmentId(4), 0, 0));
        assert!(matches!(unknown_seg, Err(RmaError::UnknownSegment { .. })));
        let overflow = resolve(
            &registry,
            GlobalPointer::new(TeamId(2), SegmentId(3), 1, u64::MAX - 8),
        );
        assert!(matches!(
            overflow,
            Err(RmaError::OffsetOutOfRange { offset }) if offset == u64::MAX - 8
        ));
    }

    #[test]
    fn window_ignores_the_unit() {
        let registry = registry();
        let pool = resolve_window(&registry, &GlobalPointer::new(TeamId(2), SegmentId(0), 7, 0));
        assert!(matches!(pool, Ok((Window(1), CommId::WORLD))));
        let seg = resolve_window(&registry, &GlobalPointer::new(TeamId(2), SegmentId(3), 7, 0));
        assert!(matches!(seg, Ok((Window(7), CommId(5)))));
        let unknown = resolve_window(&registry, &GlobalPointer::new(TeamId(2), SegmentId(-1), 0, 0));
        assert!(matches!(unknown, Err(RmaError::UnknownSegment { .. })));
    }
}
