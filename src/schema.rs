// Flow Journal schema - journal tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        password_hash -> Text,
        intro_completed -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    user_settings (id) {
        id -> Integer,
        user_id -> Integer,
        emotion_wheel -> Text,    // JSON document
        created_at -> Text,
        updated_at -> Text,
    }
}

// ============================================================================
// Journal Tables - one row per (user_id, natural key)
// ============================================================================

diesel::table! {
    intro_reflection (id) {
        id -> Integer,
        user_id -> Integer,
        q1_important_events -> Text,
        q2_current_thoughts -> Text,
        q3_physical_symptoms -> Text,
        q4_current_feelings -> Text,
        q5_brought_closer -> Text,
        q6_brought_further -> Text,
        q7_change_in_10_weeks -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    daily_entries (id) {
        id -> Integer,
        user_id -> Integer,
        entry_date -> Text,              // YYYY-MM-DD
        energy_level -> Nullable<Integer>,
        selected_emotions -> Text,       // JSON array of labels
        how_want_to_feel -> Nullable<Text>,
        daily_mantra -> Nullable<Text>,
        grateful_1 -> Nullable<Text>,
        grateful_2 -> Nullable<Text>,
        grateful_3 -> Nullable<Text>,
        goal_1 -> Nullable<Text>,
        goal_2 -> Nullable<Text>,
        goal_3 -> Nullable<Text>,
        selfcare_actions -> Nullable<Text>,
        free_journal -> Nullable<Text>,
        favorite_moment -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    weekly_reflections (id) {
        id -> Integer,
        user_id -> Integer,
        week_number -> Integer,
        week_start_date -> Text,
        week_end_date -> Text,
        current_mood -> Nullable<Text>,
        important_results -> Nullable<Text>,
        important_realizations -> Nullable<Text>,
        proud_1 -> Nullable<Text>,
        proud_2 -> Nullable<Text>,
        proud_3 -> Nullable<Text>,
        proud_4 -> Nullable<Text>,
        proud_5 -> Nullable<Text>,
        change_phase -> Nullable<Text>,
        change_reflection -> Nullable<Text>,
        next_week_focus -> Nullable<Text>,
        task_1 -> Nullable<Text>,
        task_2 -> Nullable<Text>,
        task_3 -> Nullable<Text>,
        task_4 -> Nullable<Text>,
        task_5 -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    final_reflection (id) {
        id -> Integer,
        user_id -> Integer,
        q1_starting_point -> Text,
        q2_feeling_and_goal -> Text,
        q3_journey_obstacles -> Text,
        q4_arrival_changes -> Text,
        q5_self_learning -> Text,
        q6_future_path -> Text,
        q7_journaling_impact -> Text,
        q8_celebration -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(user_settings -> users (user_id));
diesel::joinable!(intro_reflection -> users (user_id));
diesel::joinable!(daily_entries -> users (user_id));
diesel::joinable!(weekly_reflections -> users (user_id));
diesel::joinable!(final_reflection -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    user_settings,
    intro_reflection,
    daily_entries,
    weekly_reflections,
    final_reflection,
);
