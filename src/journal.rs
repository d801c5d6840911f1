//! Journal records and the natural-key upsert
//!
//! Four record kinds live in four tables, each row owned by one user and
//! identified inside that user's scope by a natural key:
//!
//! | Kind | Table | Natural key |
//! |------|-------|-------------|
//! | intro reflection | `intro_reflection` | the user |
//! | daily entry | `daily_entries` | `entry_date` |
//! | weekly reflection | `weekly_reflections` | `week_number` |
//! | final reflection | `final_reflection` | the user |
//!
//! All writes go through [`upsert`], which issues one
//! `INSERT ... ON CONFLICT (user_id, <key>) DO UPDATE` statement built from the
//! kind's [`TableSpec`]. Saves are full replacements: an optional field left
//! out of a save is stored as NULL.

use crate::db::{now_rfc3339, Database, DbError, Result};
use crate::schema::{daily_entries, final_reflection, intro_reflection, users, weekly_reflections};
use chrono::NaiveDate;
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Integer, Nullable, Text};
use diesel::sqlite::{Sqlite, SqliteConnection};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default page size for `GET /api/entries`
pub const DEFAULT_ENTRY_LIMIT: i64 = 30;

// ============================================================================
// Generic upsert-by-natural-key
// ============================================================================

/// Static description of a journal table
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub table: &'static str,
    /// Natural key columns, not counting `user_id`
    pub key_columns: &'static [&'static str],
    /// Columns overwritten on every save
    pub field_columns: &'static [&'static str],
}

impl TableSpec {
    fn conflict_target(&self) -> String {
        std::iter::once("user_id")
            .chain(self.key_columns.iter().copied())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn upsert_sql(&self) -> String {
        let columns: Vec<&str> = std::iter::once("user_id")
            .chain(self.key_columns.iter().copied())
            .chain(self.field_columns.iter().copied())
            .chain(["created_at", "updated_at"])
            .collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let assignments: Vec<String> = self
            .field_columns
            .iter()
            .chain(["updated_at"].iter())
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            self.table,
            columns.join(", "),
            placeholders,
            self.conflict_target(),
            assignments.join(", ")
        )
    }

    fn find_sql(&self) -> String {
        let mut sql = format!("SELECT * FROM {} WHERE user_id = ?", self.table);
        for column in self.key_columns {
            sql.push_str(&format!(" AND {column} = ?"));
        }
        sql
    }

    fn list_sql(&self, columns: &str, order_by: &str, limited: bool) -> String {
        let mut sql = format!(
            "SELECT {columns} FROM {} WHERE user_id = ? ORDER BY {order_by} DESC",
            self.table
        );
        if limited {
            sql.push_str(" LIMIT ?");
        }
        sql
    }
}

/// A value bound into a generated statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(Option<i32>),
    Text(Option<String>),
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(Some(v))
    }
}

impl From<Option<i32>> for SqlValue {
    fn from(v: Option<i32>) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(Some(v.to_string()))
    }
}

impl From<&Option<String>> for SqlValue {
    fn from(v: &Option<String>) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Text(Some(v.format("%Y-%m-%d").to_string()))
    }
}

type BoxedQuery = BoxedSqlQuery<'static, Sqlite, SqlQuery>;

fn bind(query: BoxedQuery, value: SqlValue) -> BoxedQuery {
    match value {
        SqlValue::Int(v) => query.bind::<Nullable<Integer>, _>(v),
        SqlValue::Text(v) => query.bind::<Nullable<Text>, _>(v),
    }
}

fn bind_all(query: BoxedQuery, values: impl IntoIterator<Item = SqlValue>) -> BoxedQuery {
    values.into_iter().fold(query, bind)
}

/// A record kind stored under a natural key
pub trait JournalRecord {
    /// Row shape returned by reads
    type Row: QueryableByName<Sqlite> + 'static;

    const SPEC: TableSpec;

    /// Values for `SPEC.key_columns`, in order
    fn key_values(&self) -> Vec<SqlValue>;

    /// Values for `SPEC.field_columns`, in order
    fn field_values(&self) -> Result<Vec<SqlValue>>;
}

/// Insert the record, or overwrite every field of the existing row with the
/// same `(user_id, natural key)`
pub fn upsert<R: JournalRecord>(conn: &mut SqliteConnection, user_id: i32, record: &R) -> Result<()> {
    let spec = R::SPEC;
    let key = record.key_values();
    let fields = record.field_values()?;
    debug_assert_eq!(key.len(), spec.key_columns.len());
    debug_assert_eq!(fields.len(), spec.field_columns.len());

    let now = now_rfc3339();
    let query = diesel::sql_query(spec.upsert_sql()).into_boxed::<Sqlite>();
    let query = bind_all(
        query,
        std::iter::once(SqlValue::Int(Some(user_id)))
            .chain(key)
            .chain(fields)
            .chain([SqlValue::Text(Some(now.clone())), SqlValue::Text(Some(now))]),
    );
    query.execute(conn)?;

    debug!(table = spec.table, user_id, "upserted");
    Ok(())
}

/// Fetch the row for `(user_id, key)`, if any
pub fn find<R: JournalRecord>(
    conn: &mut SqliteConnection,
    user_id: i32,
    key: Vec<SqlValue>,
) -> Result<Option<R::Row>> {
    let spec = R::SPEC;
    debug_assert_eq!(key.len(), spec.key_columns.len());

    let query = diesel::sql_query(spec.find_sql()).into_boxed::<Sqlite>();
    let query = bind_all(query, std::iter::once(SqlValue::Int(Some(user_id))).chain(key));
    Ok(query.get_result::<R::Row>(conn).optional()?)
}

/// Rows owned by `user_id`, newest natural key first
fn list<T: QueryableByName<Sqlite> + 'static>(
    conn: &mut SqliteConnection,
    spec: &TableSpec,
    columns: &str,
    order_by: &str,
    user_id: i32,
    limit: Option<i64>,
) -> Result<Vec<T>> {
    let query = diesel::sql_query(spec.list_sql(columns, order_by, limit.is_some()))
        .into_boxed::<Sqlite>()
        .bind::<Integer, _>(user_id);
    let query = match limit {
        Some(limit) => query.bind::<BigInt, _>(limit),
        None => query,
    };
    Ok(query.load::<T>(conn)?)
}

// ============================================================================
// Emotion labels
// ============================================================================

/// Ordered emotion labels, stored as a JSON array in a TEXT column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
#[serde(transparent)]
pub struct Emotions(pub Vec<String>);

impl FromSql<Text, Sqlite> for Emotions {
    fn from_sql(value: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let raw = <String as FromSql<Text, Sqlite>>::from_sql(value)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

// ============================================================================
// Intro Reflection
// ============================================================================

/// Body of `POST /api/intro-reflection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroReflectionInput {
    pub q1_important_events: String,
    pub q2_current_thoughts: String,
    pub q3_physical_symptoms: String,
    pub q4_current_feelings: String,
    pub q5_brought_closer: String,
    pub q6_brought_further: String,
    pub q7_change_in_10_weeks: String,
}

/// Stored intro reflection
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = intro_reflection)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct IntroReflection {
    pub id: i32,
    pub user_id: i32,
    pub q1_important_events: String,
    pub q2_current_thoughts: String,
    pub q3_physical_symptoms: String,
    pub q4_current_feelings: String,
    pub q5_brought_closer: String,
    pub q6_brought_further: String,
    pub q7_change_in_10_weeks: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JournalRecord for IntroReflectionInput {
    type Row = IntroReflection;

    const SPEC: TableSpec = TableSpec {
        table: "intro_reflection",
        key_columns: &[],
        field_columns: &[
            "q1_important_events",
            "q2_current_thoughts",
            "q3_physical_symptoms",
            "q4_current_feelings",
            "q5_brought_closer",
            "q6_brought_further",
            "q7_change_in_10_weeks",
        ],
    };

    fn key_values(&self) -> Vec<SqlValue> {
        Vec::new()
    }

    fn field_values(&self) -> Result<Vec<SqlValue>> {
        Ok(vec![
            self.q1_important_events.as_str().into(),
            self.q2_current_thoughts.as_str().into(),
            self.q3_physical_symptoms.as_str().into(),
            self.q4_current_feelings.as_str().into(),
            self.q5_brought_closer.as_str().into(),
            self.q6_brought_further.as_str().into(),
            self.q7_change_in_10_weeks.as_str().into(),
        ])
    }
}

// ============================================================================
// Daily Entry
// ============================================================================

/// Body of `POST /api/entries`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyEntryInput {
    pub entry_date: NaiveDate,
    #[serde(default)]
    pub energy_level: Option<i32>,
    #[serde(default)]
    pub selected_emotions: Vec<String>,
    #[serde(default)]
    pub how_want_to_feel: Option<String>,
    #[serde(default)]
    pub daily_mantra: Option<String>,
    #[serde(default)]
    pub grateful_1: Option<String>,
    #[serde(default)]
    pub grateful_2: Option<String>,
    #[serde(default)]
    pub grateful_3: Option<String>,
    #[serde(default)]
    pub goal_1: Option<String>,
    #[serde(default)]
    pub goal_2: Option<String>,
    #[serde(default)]
    pub goal_3: Option<String>,
    #[serde(default)]
    pub selfcare_actions: Option<String>,
    #[serde(default)]
    pub free_journal: Option<String>,
    #[serde(default)]
    pub favorite_moment: Option<String>,
}

impl DailyEntryInput {
    /// An entry for `entry_date` with every optional field empty
    pub fn empty(entry_date: NaiveDate) -> Self {
        Self {
            entry_date,
            energy_level: None,
            selected_emotions: Vec::new(),
            how_want_to_feel: None,
            daily_mantra: None,
            grateful_1: None,
            grateful_2: None,
            grateful_3: None,
            goal_1: None,
            goal_2: None,
            goal_3: None,
            selfcare_actions: None,
            free_journal: None,
            favorite_moment: None,
        }
    }
}

/// Stored daily entry
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = daily_entries)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct DailyEntry {
    pub id: i32,
    pub user_id: i32,
    pub entry_date: String,
    pub energy_level: Option<i32>,
    pub selected_emotions: Emotions,
    pub how_want_to_feel: Option<String>,
    pub daily_mantra: Option<String>,
    pub grateful_1: Option<String>,
    pub grateful_2: Option<String>,
    pub grateful_3: Option<String>,
    pub goal_1: Option<String>,
    pub goal_2: Option<String>,
    pub goal_3: Option<String>,
    pub selfcare_actions: Option<String>,
    pub free_journal: Option<String>,
    pub favorite_moment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Row shape of the daily entry listing
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = daily_entries)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct DailyEntrySummary {
    pub entry_date: String,
    pub selected_emotions: Emotions,
    pub created_at: String,
}

impl JournalRecord for DailyEntryInput {
    type Row = DailyEntry;

    const SPEC: TableSpec = TableSpec {
        table: "daily_entries",
        key_columns: &["entry_date"],
        field_columns: &[
            "energy_level",
            "selected_emotions",
            "how_want_to_feel",
            "daily_mantra",
            "grateful_1",
            "grateful_2",
            "grateful_3",
            "goal_1",
            "goal_2",
            "goal_3",
            "selfcare_actions",
            "free_journal",
            "favorite_moment",
        ],
    };

    fn key_values(&self) -> Vec<SqlValue> {
        vec![self.entry_date.into()]
    }

    fn field_values(&self) -> Result<Vec<SqlValue>> {
        let emotions = serde_json::to_string(&self.selected_emotions)?;
        Ok(vec![
            self.energy_level.into(),
            emotions.as_str().into(),
            (&self.how_want_to_feel).into(),
            (&self.daily_mantra).into(),
            (&self.grateful_1).into(),
            (&self.grateful_2).into(),
            (&self.grateful_3).into(),
            (&self.goal_1).into(),
            (&self.goal_2).into(),
            (&self.goal_3).into(),
            (&self.selfcare_actions).into(),
            (&self.free_journal).into(),
            (&self.favorite_moment).into(),
        ])
    }
}

// ============================================================================
// Weekly Reflection
// ============================================================================

/// Body of `POST /api/weekly-reflection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyReflectionInput {
    pub week_number: i32,
    pub week_start_date: NaiveDate,
    pub week_end_date: NaiveDate,
    #[serde(default)]
    pub current_mood: Option<String>,
    #[serde(default)]
    pub important_results: Option<String>,
    #[serde(default)]
    pub important_realizations: Option<String>,
    #[serde(default)]
    pub proud_1: Option<String>,
    #[serde(default)]
    pub proud_2: Option<String>,
    #[serde(default)]
    pub proud_3: Option<String>,
    #[serde(default)]
    pub proud_4: Option<String>,
    #[serde(default)]
    pub proud_5: Option<String>,
    #[serde(default)]
    pub change_phase: Option<String>,
    #[serde(default)]
    pub change_reflection: Option<String>,
    #[serde(default)]
    pub next_week_focus: Option<String>,
    #[serde(default)]
    pub task_1: Option<String>,
    #[serde(default)]
    pub task_2: Option<String>,
    #[serde(default)]
    pub task_3: Option<String>,
    #[serde(default)]
    pub task_4: Option<String>,
    #[serde(default)]
    pub task_5: Option<String>,
}

impl WeeklyReflectionInput {
    /// A reflection for `week_number` with every optional field empty
    pub fn empty(week_number: i32, week_start_date: NaiveDate, week_end_date: NaiveDate) -> Self {
        Self {
            week_number,
            week_start_date,
            week_end_date,
            current_mood: None,
            important_results: None,
            important_realizations: None,
            proud_1: None,
            proud_2: None,
            proud_3: None,
            proud_4: None,
            proud_5: None,
            change_phase: None,
            change_reflection: None,
            next_week_focus: None,
            task_1: None,
            task_2: None,
            task_3: None,
            task_4: None,
            task_5: None,
        }
    }
}

/// Stored weekly reflection
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = weekly_reflections)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct WeeklyReflection {
    pub id: i32,
    pub user_id: i32,
    pub week_number: i32,
    pub week_start_date: String,
    pub week_end_date: String,
    pub current_mood: Option<String>,
    pub important_results: Option<String>,
    pub important_realizations: Option<String>,
    pub proud_1: Option<String>,
    pub proud_2: Option<String>,
    pub proud_3: Option<String>,
    pub proud_4: Option<String>,
    pub proud_5: Option<String>,
    pub change_phase: Option<String>,
    pub change_reflection: Option<String>,
    pub next_week_focus: Option<String>,
    pub task_1: Option<String>,
    pub task_2: Option<String>,
    pub task_3: Option<String>,
    pub task_4: Option<String>,
    pub task_5: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JournalRecord for WeeklyReflectionInput {
    type Row = WeeklyReflection;

    const SPEC: TableSpec = TableSpec {
        table: "weekly_reflections",
        key_columns: &["week_number"],
        field_columns: &[
            "week_start_date",
            "week_end_date",
            "current_mood",
            "important_results",
            "important_realizations",
            "proud_1",
            "proud_2",
            "proud_3",
            "proud_4",
            "proud_5",
            "change_phase",
            "change_reflection",
            "next_week_focus",
            "task_1",
            "task_2",
            "task_3",
            "task_4",
            "task_5",
        ],
    };

    fn key_values(&self) -> Vec<SqlValue> {
        vec![self.week_number.into()]
    }

    fn field_values(&self) -> Result<Vec<SqlValue>> {
        Ok(vec![
            self.week_start_date.into(),
            self.week_end_date.into(),
            (&self.current_mood).into(),
            (&self.important_results).into(),
            (&self.important_realizations).into(),
            (&self.proud_1).into(),
            (&self.proud_2).into(),
            (&self.proud_3).into(),
            (&self.proud_4).into(),
            (&self.proud_5).into(),
            (&self.change_phase).into(),
            (&self.change_reflection).into(),
            (&self.next_week_focus).into(),
            (&self.task_1).into(),
            (&self.task_2).into(),
            (&self.task_3).into(),
            (&self.task_4).into(),
            (&self.task_5).into(),
        ])
    }
}

// ============================================================================
// Final Reflection
// ============================================================================

/// Body of `POST /api/final-reflection`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReflectionInput {
    pub q1_starting_point: String,
    pub q2_feeling_and_goal: String,
    pub q3_journey_obstacles: String,
    pub q4_arrival_changes: String,
    pub q5_self_learning: String,
    pub q6_future_path: String,
    pub q7_journaling_impact: String,
    pub q8_celebration: String,
}

/// Stored final reflection
#[derive(QueryableByName, Debug, Clone, PartialEq, Eq, Serialize)]
#[diesel(table_name = final_reflection)]
#[cfg_attr(feature = "ts-rs", derive(ts_rs::TS))]
pub struct FinalReflection {
    pub id: i32,
    pub user_id: i32,
    pub q1_starting_point: String,
    pub q2_feeling_and_goal: String,
    pub q3_journey_obstacles: String,
    pub q4_arrival_changes: String,
    pub q5_self_learning: String,
    pub q6_future_path: String,
    pub q7_journaling_impact: String,
    pub q8_celebration: String,
    pub created_at: String,
    pub updated_at: String,
}

impl JournalRecord for FinalReflectionInput {
    type Row = FinalReflection;

    const SPEC: TableSpec = TableSpec {
        table: "final_reflection",
        key_columns: &[],
        field_columns: &[
            "q1_starting_point",
            "q2_feeling_and_goal",
            "q3_journey_obstacles",
            "q4_arrival_changes",
            "q5_self_learning",
            "q6_future_path",
            "q7_journaling_impact",
            "q8_celebration",
        ],
    };

    fn key_values(&self) -> Vec<SqlValue> {
        Vec::new()
    }

    fn field_values(&self) -> Result<Vec<SqlValue>> {
        Ok(vec![
            self.q1_starting_point.as_str().into(),
            self.q2_feeling_and_goal.as_str().into(),
            self.q3_journey_obstacles.as_str().into(),
            self.q4_arrival_changes.as_str().into(),
            self.q5_self_learning.as_str().into(),
            self.q6_future_path.as_str().into(),
            self.q7_journaling_impact.as_str().into(),
            self.q8_celebration.as_str().into(),
        ])
    }
}

// ============================================================================
// Journal Operations
// ============================================================================

impl Database {
    /// Save the intro reflection and mark the user's intro as completed
    pub fn save_intro_reflection(&self, user_id: i32, reflection: &IntroReflectionInput) -> Result<()> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction::<(), DbError, _>(|conn| {
            upsert(conn, user_id, reflection)?;
            diesel::update(users::table.filter(users::id.eq(user_id)))
                .set(users::intro_completed.eq(true))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Intro reflection for a user; absence is an error
    pub fn get_intro_reflection(&self, user_id: i32) -> Result<IntroReflection> {
        let mut conn = self.get_conn()?;
        find::<IntroReflectionInput>(&mut conn, user_id, Vec::new())?
            .ok_or(DbError::NotFound("Intro reflection"))
    }

    pub fn save_daily_entry(&self, user_id: i32, entry: &DailyEntryInput) -> Result<()> {
        let mut conn = self.get_conn()?;
        upsert(&mut conn, user_id, entry)
    }

    pub fn get_daily_entry(&self, user_id: i32, entry_date: NaiveDate) -> Result<Option<DailyEntry>> {
        let mut conn = self.get_conn()?;
        find::<DailyEntryInput>(&mut conn, user_id, vec![entry_date.into()])
    }

    /// Most recent entries first, at most `limit`; a negative limit counts as 0
    pub fn list_daily_entries(&self, user_id: i32, limit: i64) -> Result<Vec<DailyEntrySummary>> {
        let mut conn = self.get_conn()?;
        list(
            &mut conn,
            &DailyEntryInput::SPEC,
            "entry_date, selected_emotions, created_at",
            "entry_date",
            user_id,
            Some(limit.max(0)),
        )
    }

    pub fn save_weekly_reflection(&self, user_id: i32, reflection: &WeeklyReflectionInput) -> Result<()> {
        let mut conn = self.get_conn()?;
        upsert(&mut conn, user_id, reflection)
    }

    pub fn get_weekly_reflection(&self, user_id: i32, week_number: i32) -> Result<Option<WeeklyReflection>> {
        let mut conn = self.get_conn()?;
        find::<WeeklyReflectionInput>(&mut conn, user_id, vec![week_number.into()])
    }

    /// Every weekly reflection, highest week number first
    pub fn list_weekly_reflections(&self, user_id: i32) -> Result<Vec<WeeklyReflection>> {
        let mut conn = self.get_conn()?;
        list(&mut conn, &WeeklyReflectionInput::SPEC, "*", "week_number", user_id, None)
    }

    pub fn save_final_reflection(&self, user_id: i32, reflection: &FinalReflectionInput) -> Result<()> {
        let mut conn = self.get_conn()?;
        upsert(&mut conn, user_id, reflection)
    }

    /// Final reflection for a user; absence is an error
    pub fn get_final_reflection(&self, user_id: i32) -> Result<FinalReflection> {
        let mut conn = self.get_conn()?;
        find::<FinalReflectionInput>(&mut conn, user_id, Vec::new())?
            .ok_or(DbError::NotFound("Final reflection"))
    }
}
