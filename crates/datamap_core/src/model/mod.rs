//! Generic data model shared by every engine.
//!
//! # Responsibility
//! - Define the dynamically typed `Value` carried through criteria and rows.
//! - Define the order-preserving `Row` and the `ResultSet` returned by reads.
//!
//! # Invariants
//! - Rows are plain values; they carry no identity or change-tracking state.
//! - Joined-table columns and resolved relations live in nested sub-rows.

pub mod row;
pub mod value;
