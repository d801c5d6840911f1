#![cfg(feature = "ts-rs")]

use flowjournal::{DailyEntrySummary, FinalReflection, UserStatus};
use ts_rs::TS;

#[test]
fn test_user_status_generation() {
    assert_eq!(
        UserStatus::decl(),
        "type UserStatus = { user_id: number, username: string, intro_completed: boolean, created_at: string, };"
    );
}

#[test]
fn test_daily_entry_summary_generation() {
    assert_eq!(
        DailyEntrySummary::decl(),
        "type DailyEntrySummary = { entry_date: string, selected_emotions: Emotions, created_at: string, };"
    );
}

#[test]
fn test_final_reflection_generation() {
    assert_eq!(
        FinalReflection::decl(),
        "type FinalReflection = { id: number, user_id: number, q1_starting_point: string, q2_feeling_and_goal: string, q3_journey_obstacles: string, q4_arrival_changes: string, q5_self_learning: string, q6_future_path: string, q7_journaling_impact: string, q8_celebration: string, created_at: string, updated_at: string, };"
    );
}
