//! Achievement rules.
//!
//! Each rule is an immutable predicate over [`AchievementStats`]. Evaluation is
//! pure: it returns the ids that became satisfied and never looks at rules
//! that are already unlocked.

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::aggregation::calendar_date;
use crate::goals::{longest_streak, Goal};
use crate::RunRecord;

/// Aggregate state the rules are evaluated against. Distances and elevation in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AchievementStats {
    pub run_count: usize,
    pub total_distance_meters: f64,
    pub total_elevation_meters: f64,
    pub longest_run_meters: f64,
    /// Longest streak of consecutive calendar days with a run
    pub longest_streak_days: u32,
    pub completed_goals: usize,
    pub story_count: usize,
}

impl AchievementStats {
    pub fn collect(runs: &[RunRecord], goals: &[Goal], story_count: usize, offset: FixedOffset) -> Self {
        Self {
            run_count: runs.len(),
            total_distance_meters: runs.iter().map(|r| r.total_distance_meters).sum(),
            total_elevation_meters: runs.iter().map(|r| r.elevation_gain_meters).sum(),
            longest_run_meters: runs.iter().map(|r| r.total_distance_meters).fold(0.0, f64::max),
            longest_streak_days: longest_streak(runs.iter().map(|r| calendar_date(r.start_time, offset))),
            completed_goals: goals.iter().filter(|g| g.completed).count(),
            story_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Achievement {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub predicate: fn(&AchievementStats) -> bool,
}

const KM: f64 = 1000.0;
const HALF_MARATHON_METERS: f64 = 21_097.5;
const MARATHON_METERS: f64 = 42_195.0;

pub static ACHIEVEMENTS: &[Achievement] = &[
    Achievement {
        id: "first_run",
        title: "First Steps",
        description: "Log your first run",
        predicate: |s| s.run_count >= 1,
    },
    Achievement {
        id: "runs_10",
        title: "Getting Started",
        description: "Log 10 runs",
        predicate: |s| s.run_count >= 10,
    },
    Achievement {
        id: "runs_50",
        title: "Regular",
        description: "Log 50 runs",
        predicate: |s| s.run_count >= 50,
    },
    Achievement {
        id: "runs_100",
        title: "Centurion",
        description: "Log 100 runs",
        predicate: |s| s.run_count >= 100,
    },
    Achievement {
        id: "distance_100k",
        title: "100 Club",
        description: "Run 100 km in total",
        predicate: |s| s.total_distance_meters >= 100.0 * KM,
    },
    Achievement {
        id: "distance_500k",
        title: "Long Haul",
        description: "Run 500 km in total",
        predicate: |s| s.total_distance_meters >= 500.0 * KM,
    },
    Achievement {
        id: "distance_1000k",
        title: "Thousand",
        description: "Run 1,000 km in total",
        predicate: |s| s.total_distance_meters >= 1000.0 * KM,
    },
    Achievement {
        id: "single_5k",
        title: "5K",
        description: "Complete a run of at least 5 km",
        predicate: |s| s.longest_run_meters >= 5.0 * KM,
    },
    Achievement {
        id: "single_10k",
        title: "10K",
        description: "Complete a run of at least 10 km",
        predicate: |s| s.longest_run_meters >= 10.0 * KM,
    },
    Achievement {
        id: "half_marathon",
        title: "Half Marathon",
        description: "Complete a run of at least 21.1 km",
        predicate: |s| s.longest_run_meters >= HALF_MARATHON_METERS,
    },
    Achievement {
        id: "marathon",
        title: "Marathon",
        description: "Complete a run of at least 42.2 km",
        predicate: |s| s.longest_run_meters >= MARATHON_METERS,
    },
    Achievement {
        id: "streak_7",
        title: "Week Streak",
        description: "Run on 7 consecutive days",
        predicate: |s| s.longest_streak_days >= 7,
    },
    Achievement {
        id: "streak_30",
        title: "Month Streak",
        description: "Run on 30 consecutive days",
        predicate: |s| s.longest_streak_days >= 30,
    },
    Achievement {
        id: "elevation_1000",
        title: "Hill Climber",
        description: "Climb 1,000 m in total",
        predicate: |s| s.total_elevation_meters >= 1000.0,
    },
    Achievement {
        id: "elevation_everest",
        title: "Everest",
        description: "Climb 8,848 m in total",
        predicate: |s| s.total_elevation_meters >= 8848.0,
    },
    Achievement {
        id: "first_goal",
        title: "Goal Getter",
        description: "Complete a goal",
        predicate: |s| s.completed_goals >= 1,
    },
    Achievement {
        id: "goals_5",
        title: "Driven",
        description: "Complete 5 goals",
        predicate: |s| s.completed_goals >= 5,
    },
    Achievement {
        id: "first_story",
        title: "Storyteller",
        description: "Write your first run story",
        predicate: |s| s.story_count >= 1,
    },
    Achievement {
        id: "stories_10",
        title: "Chronicler",
        description: "Write 10 run stories",
        predicate: |s| s.story_count >= 10,
    },
];

/// Ids of rules not in `unlocked` that `stats` now satisfies, in rule order.
pub fn evaluate_achievements(unlocked: &BTreeSet<String>, stats: &AchievementStats) -> Vec<&'static str> {
    ACHIEVEMENTS
        .iter()
        .filter(|a| !unlocked.contains(a.id))
        .filter(|a| (a.predicate)(stats))
        .map(|a| a.id)
        .collect()
}

pub fn find_achievement(id: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|a| a.id == id)
}
