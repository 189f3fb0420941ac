//! Core value types shared by tables, expressions and the coordinator.

mod value;

pub use value::{
    date_to_timestamp, format_date, format_timestamp, parse_date, parse_timestamp,
    timestamp_to_date, value_at, Cell, DataType, Value,
};
