//! Write TypeScript declarations for the API records
//!
//! Usage: cargo run --bin gen_types --features ts-rs [OUT_FILE]

use flowjournal::{
    DailyEntry, DailyEntrySummary, Emotions, FinalReflection, IntroReflection, UserStatus,
    WeeklyReflection, TS,
};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let out = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("web/src/types/generated.ts"));

    let decls = [
        Emotions::decl(),
        UserStatus::decl(),
        IntroReflection::decl(),
        DailyEntry::decl(),
        DailyEntrySummary::decl(),
        WeeklyReflection::decl(),
        FinalReflection::decl(),
    ];

    let mut body = String::from("// Generated by gen_types. Do not edit.\n\n");
    for decl in decls {
        body.push_str("export ");
        body.push_str(&decl);
        body.push_str("\n\n");
    }

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&out, body)?;
    println!("Wrote {}", out.display());
    Ok(())
}
