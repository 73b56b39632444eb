//! Coverage evaluation
//!
//! Pure functions over already-fetched requirements and shifts. Nothing here
//! touches storage, so callers decide what "committed" means (and what locks
//! they hold) before asking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CoverageRequirement, Shift, TimeWindow};

/// Staffing level of one requirement window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffingLevel {
    Understaffed,
    Satisfied,
    Overstaffed,
}

impl StaffingLevel {
    pub fn classify(current: usize, required: u32) -> Self {
        let required = required as usize;
        match current.cmp(&required) {
            std::cmp::Ordering::Less => Self::Understaffed,
            std::cmp::Ordering::Equal => Self::Satisfied,
            std::cmp::Ordering::Greater => Self::Overstaffed,
        }
    }
}

/// One requirement with the staffing observed against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageStatus {
    pub requirement: CoverageRequirement,
    pub current: usize,
    pub level: StaffingLevel,
}

/// Coverage view of a single team
///
/// Requirements and shifts of other teams are ignored, so callers may pass
/// unfiltered slices.
#[derive(Debug, Clone, Copy)]
pub struct CoverageEvaluator<'a> {
    team_id: Uuid,
    requirements: &'a [CoverageRequirement],
    shifts: &'a [Shift],
}

impl<'a> CoverageEvaluator<'a> {
    pub fn new(
        team_id: Uuid,
        requirements: &'a [CoverageRequirement],
        shifts: &'a [Shift],
    ) -> Self {
        Self {
            team_id,
            requirements,
            shifts,
        }
    }

    fn team_requirements(&self) -> impl Iterator<Item = &'a CoverageRequirement> + '_ {
        self.requirements
            .iter()
            .filter(move |r| r.team_id == self.team_id)
    }

    fn team_shifts(&self) -> impl Iterator<Item = &'a Shift> + '_ {
        self.shifts.iter().filter(move |s| s.team_id == self.team_id)
    }

    /// Committed shifts of the team overlapping `window`
    pub fn current_coverage(&self, window: &TimeWindow) -> usize {
        self.team_shifts()
            .filter(|s| s.window().overlaps(window))
            .count()
    }

    /// Sum of requirements whose window contains `instant`
    pub fn required_at(&self, instant: DateTime<Utc>) -> u32 {
        self.team_requirements()
            .filter(|r| r.window().contains_instant(instant))
            .map(|r| r.required)
            .sum()
    }

    /// Highest requirement in force at any instant of `window`
    ///
    /// The summed requirement only changes at requirement starts, so checking
    /// the window start and every requirement start inside it is exhaustive.
    pub fn required_coverage(&self, window: &TimeWindow) -> u32 {
        if !window.is_valid() {
            return 0;
        }

        std::iter::once(window.start)
            .chain(
                self.team_requirements()
                    .map(|r| r.start)
                    .filter(|start| window.contains_instant(*start)),
            )
            .map(|instant| self.required_at(instant))
            .max()
            .unwrap_or(0)
    }

    /// First requirement intersecting `window` whose own window is already full
    pub fn saturated_requirement(&self, window: &TimeWindow) -> Option<&'a CoverageRequirement> {
        self.team_requirements()
            .filter(|r| r.window().overlaps(window))
            .find(|r| self.current_coverage(&r.window()) >= r.required as usize)
    }

    /// Whether one more assignee may take `window` without overbooking
    pub fn allows_assignment(&self, window: &TimeWindow) -> bool {
        self.saturated_requirement(window).is_none()
    }

    /// Staffing level of every requirement, ordered by start
    pub fn summary(&self) -> Vec<CoverageStatus> {
        let mut statuses: Vec<CoverageStatus> = self
            .team_requirements()
            .map(|requirement| {
                let current = self.current_coverage(&requirement.window());
                CoverageStatus {
                    requirement: requirement.clone(),
                    current,
                    level: StaffingLevel::classify(current, requirement.required),
                }
            })
            .collect();

        statuses.sort_by_key(|s| (s.requirement.start, s.requirement.end));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, hour, minute, 0).unwrap()
    }

    fn window(start: (u32, u32), end: (u32, u32)) -> TimeWindow {
        TimeWindow::new(at(start.0, start.1), at(end.0, end.1))
    }

    fn requirement(team_id: Uuid, w: TimeWindow, required: u32) -> CoverageRequirement {
        CoverageRequirement {
            id: Uuid::new_v4(),
            event_id: Uuid::nil(),
            team_id,
            start: w.start,
            end: w.end,
            required,
        }
    }

    fn shift(team_id: Uuid, w: TimeWindow) -> Shift {
        Shift {
            id: Uuid::new_v4(),
            event_id: Uuid::nil(),
            team_id,
            assignee_id: Uuid::new_v4(),
            start: w.start,
            end: w.end,
            created_by: Uuid::nil(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_current_coverage_counts_team_overlaps_only() {
        let bar = Uuid::new_v4();
        let kitchen = Uuid::new_v4();
        let shifts = vec![
            shift(bar, window((18, 0), (19, 0))),
            shift(bar, window((20, 0), (21, 0))),
            shift(kitchen, window((18, 0), (19, 0))),
        ];
        let eval = CoverageEvaluator::new(bar, &[], &shifts);

        assert_eq!(eval.current_coverage(&window((18, 0), (20, 0))), 1);
        // Half-open: a shift ending at 20:00 does not cover 20:00 onwards
        assert_eq!(eval.current_coverage(&window((19, 0), (20, 0))), 0);
    }

    #[test]
    fn test_required_sums_overlapping_requirements() {
        let bar = Uuid::new_v4();
        let reqs = vec![
            requirement(bar, window((18, 0), (20, 0)), 1),
            requirement(bar, window((19, 0), (22, 0)), 2),
        ];
        let eval = CoverageEvaluator::new(bar, &reqs, &[]);

        assert_eq!(eval.required_at(at(18, 30)), 1);
        assert_eq!(eval.required_at(at(19, 30)), 3);
        assert_eq!(eval.required_at(at(22, 0)), 0);
        assert_eq!(eval.required_coverage(&window((17, 0), (19, 30))), 3);
        assert_eq!(eval.required_coverage(&window((20, 0), (23, 0))), 2);
    }

    #[test]
    fn test_saturation_blocks_assignment() {
        let bar = Uuid::new_v4();
        let reqs = vec![requirement(bar, window((18, 0), (20, 0)), 1)];
        let shifts = vec![shift(bar, window((18, 0), (19, 0)))];
        let eval = CoverageEvaluator::new(bar, &reqs, &shifts);

        assert!(!eval.allows_assignment(&window((18, 30), (19, 30))));
        assert!(eval.allows_assignment(&window((20, 0), (21, 0))));
    }

    #[test]
    fn test_summary_levels() {
        let bar = Uuid::new_v4();
        let reqs = vec![
            requirement(bar, window((18, 0), (20, 0)), 1),
            requirement(bar, window((12, 0), (14, 0)), 2),
            requirement(bar, window((9, 0), (10, 0)), 1),
        ];
        let shifts = vec![
            shift(bar, window((18, 0), (19, 0))),
            shift(bar, window((18, 30), (19, 30))),
            shift(bar, window((12, 0), (14, 0))),
            shift(bar, window((12, 0), (13, 0))),
        ];
        let summary = CoverageEvaluator::new(bar, &reqs, &shifts).summary();

        let levels: Vec<_> = summary.iter().map(|s| s.level).collect();
        assert_eq!(
            levels,
            vec![
                StaffingLevel::Understaffed,
                StaffingLevel::Satisfied,
                StaffingLevel::Overstaffed
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_assignment_allowed_iff_every_overlapping_requirement_has_room(
            required in 1u32..4,
            staffed in 0usize..6,
        ) {
            let bar = Uuid::new_v4();
            let reqs = vec![requirement(bar, window((18, 0), (20, 0)), required)];
            let shifts: Vec<_> = (0..staffed)
                .map(|_| shift(bar, window((18, 0), (19, 0))))
                .collect();
            let eval = CoverageEvaluator::new(bar, &reqs, &shifts);

            prop_assert_eq!(
                eval.allows_assignment(&window((18, 30), (19, 30))),
                staffed < required as usize
            );
            prop_assert!(eval.allows_assignment(&window((20, 0), (21, 0))));
        }
    }
}
