//! Result aggregation and export.

pub mod aggregate;

pub use aggregate::{Column, Order, Query, RowStatus, SummaryRow, SummaryTable};
