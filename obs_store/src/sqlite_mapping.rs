// https://github.com/diesel-rs/diesel/issues/852
pub use diesel::sql_types::*;
// Changes the mapping for every `Integer` column to i64, not only the
// `PRIMARY KEY AUTOINCREMENT` ones.
pub type Integer = BigInt;
