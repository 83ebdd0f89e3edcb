mod backfill;
pub mod support;
