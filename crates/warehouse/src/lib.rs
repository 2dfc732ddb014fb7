pub mod client;
pub mod config;
pub mod convert;
pub mod planner;
pub mod result;

pub use client::{fetch_item, FetchItemError, HttpWarehouseClient, WarehouseClient, WarehouseError};
pub use config::WarehouseConfig;
pub use convert::{decode_cell, decode_row, parse_timestamp, CellKind, ConvertError};
pub use planner::{ParameterType, PlanError, QueryPlanner, Statement, StatementParameter};
pub use result::{Column, QueryResult, RawRow, RawValue};
