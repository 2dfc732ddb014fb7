//! Builds the fetch statement for a data type or data source.
//!
//! Filter values are always bound as statement parameters; only validated
//! identifiers are ever spliced into the SQL text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use blade_core::config::SyncConfig;
use blade_core::{DataSource, DataType, FilterCondition, FilterOp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("unsupported filter value for column '{column}': {reason}")]
    UnsupportedValue { column: String, reason: String },
}

/// Parameter type names understood by the statement API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterType {
    String,
    Bigint,
    Double,
    Boolean,
}

/// A named, typed value bound to a `:name` marker in the SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementParameter {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
}

/// SQL text plus its bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub parameters: Vec<StatementParameter>,
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        for p in &self.parameters {
            write!(f, "\n  :{} = {:?} ({:?})", p.name, p.value, p.param_type)?;
        }
        Ok(())
    }
}

// ── Identifiers ──────────────────────────────────────────────────

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(s: &str) -> Result<(), PlanError> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(PlanError::InvalidIdentifier(s.to_string()))
    }
}

/// Dot-separated identifier, e.g. `main.ops.mx_events`.
fn check_table_name(s: &str) -> Result<(), PlanError> {
    if !s.is_empty() && s.split('.').all(is_identifier) {
        Ok(())
    } else {
        Err(PlanError::InvalidIdentifier(s.to_string()))
    }
}

// ── Planner ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    mapping: BTreeMap<DataType, String>,
    schema_name: Option<String>,
    max_records_per_query: u64,
}

impl QueryPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        let mapping = DataType::ALL
            .iter()
            .map(|dt| (*dt, cfg.table_for(*dt)))
            .collect();
        Self {
            mapping,
            schema_name: Some(cfg.schema_name.clone()).filter(|s| !s.is_empty()),
            max_records_per_query: cfg.max_records_per_query,
        }
    }

    pub fn with_mapping(mut self, data_type: DataType, table: impl Into<String>) -> Self {
        self.mapping.insert(data_type, table.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema_name = Some(schema.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_max_records(mut self, max: u64) -> Self {
        self.max_records_per_query = max;
        self
    }

    /// Unqualified table for `data_type`; `blade_<type>_data` when unmapped.
    pub fn table_for(&self, data_type: DataType) -> String {
        self.mapping
            .get(&data_type)
            .filter(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| data_type.default_table_name())
    }

    pub fn build_query(
        &self,
        data_type: DataType,
        filter: &[FilterCondition],
        limit: Option<u64>,
    ) -> Result<Statement, PlanError> {
        let table = self.table_for(data_type);
        let qualified = match &self.schema_name {
            Some(schema) => {
                check_identifier(schema)?;
                format!("{schema}.{table}")
            }
            None => table,
        };
        self.render(&qualified, filter, limit)
    }

    /// Single-row lookup by `item_id`. The id is bound, never spliced.
    pub fn build_item_query(&self, data_type: DataType, item_id: &str) -> Result<Statement, PlanError> {
        let by_id = FilterCondition {
            column: "item_id".into(),
            op: FilterOp::Eq,
            value: serde_json::Value::String(item_id.to_string()),
        };
        self.build_query(data_type, &[by_id], Some(1))
    }

    /// Plan for a configured source: its explicit table when set, else the
    /// data type mapping.
    pub fn build_query_for_source(
        &self,
        source: &DataSource,
        filter: &[FilterCondition],
        limit: Option<u64>,
    ) -> Result<Statement, PlanError> {
        match source.full_table_name() {
            Some(table) => self.render(&table, filter, limit),
            None => self.build_query(source.data_type, filter, limit),
        }
    }

    fn render(
        &self,
        table: &str,
        filter: &[FilterCondition],
        limit: Option<u64>,
    ) -> Result<Statement, PlanError> {
        check_table_name(table)?;

        let mut sql = format!("SELECT * FROM {table}");
        let mut parameters = Vec::new();
        let mut clauses = Vec::with_capacity(filter.len());

        for cond in filter {
            check_identifier(&cond.column)?;
            let clause = match bind_value(&cond.column, &cond.value)? {
                None => match cond.op {
                    FilterOp::Eq => format!("{} IS NULL", cond.column),
                    FilterOp::Ne => format!("{} IS NOT NULL", cond.column),
                    other => {
                        return Err(PlanError::UnsupportedValue {
                            column: cond.column.clone(),
                            reason: format!("null cannot be compared with '{}'", other.as_sql()),
                        })
                    }
                },
                Some((value, param_type)) => {
                    let name = format!("p{}", parameters.len());
                    let clause = format!("{} {} :{}", cond.column, cond.op.as_sql(), name);
                    parameters.push(StatementParameter {
                        name,
                        value,
                        param_type,
                    });
                    clause
                }
            };
            clauses.push(clause);
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let effective_limit = limit
            .filter(|n| *n > 0)
            .or(Some(self.max_records_per_query).filter(|n| *n > 0));
        if let Some(n) = effective_limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }

        Ok(Statement { sql, parameters })
    }
}

/// Text rendering and type of a filter value; `None` for JSON null.
fn bind_value(
    column: &str,
    value: &serde_json::Value,
) -> Result<Option<(String, ParameterType)>, PlanError> {
    use serde_json::Value;
    let bound = match value {
        Value::Null => return Ok(None),
        Value::String(s) => (s.clone(), ParameterType::String),
        Value::Bool(b) => (b.to_string(), ParameterType::Boolean),
        Value::Number(n) if n.is_i64() || n.is_u64() => (n.to_string(), ParameterType::Bigint),
        Value::Number(n) => (n.to_string(), ParameterType::Double),
        Value::Array(_) | Value::Object(_) => {
            return Err(PlanError::UnsupportedValue {
                column: column.to_string(),
                reason: "only scalar values can be bound".into(),
            })
        }
    };
    Ok(Some(bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unmapped_type_uses_default_table() {
        let planner = QueryPlanner::new();
        let stmt = planner.build_query(DataType::Sortie, &[], None).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM blade_sortie_data");
        assert!(stmt.parameters.is_empty());
    }

    #[test]
    fn schema_and_limit() {
        let planner = QueryPlanner::new()
            .with_schema("public")
            .with_mapping(DataType::Maintenance, "mx_events")
            .with_max_records(1000);
        let stmt = planner.build_query(DataType::Maintenance, &[], None).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM public.mx_events LIMIT 1000");

        let stmt = planner.build_query(DataType::Maintenance, &[], Some(25)).unwrap();
        assert!(stmt.sql.ends_with("LIMIT 25"));

        let stmt = planner.build_query(DataType::Maintenance, &[], Some(0)).unwrap();
        assert!(stmt.sql.ends_with("LIMIT 1000"));
    }

    #[test]
    fn filter_values_are_bound() {
        let planner = QueryPlanner::new();
        let filter = vec![
            FilterCondition::eq("base_location", "Hill AFB"),
            FilterCondition {
                column: "flight_hours".into(),
                op: FilterOp::Ge,
                value: json!(2.5),
            },
            FilterCondition::eq("priority", 1),
            FilterCondition::eq("active", true),
        ];
        let stmt = planner.build_query(DataType::Sortie, &filter, None).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM blade_sortie_data WHERE base_location = :p0 AND flight_hours >= :p1 \
             AND priority = :p2 AND active = :p3"
        );
        let types: Vec<ParameterType> = stmt.parameters.iter().map(|p| p.param_type).collect();
        assert_eq!(
            types,
            vec![
                ParameterType::String,
                ParameterType::Double,
                ParameterType::Bigint,
                ParameterType::Boolean
            ]
        );
        assert_eq!(stmt.parameters[0].value, "Hill AFB");
    }

    #[test]
    fn null_filters_render_is_null() {
        let planner = QueryPlanner::new();
        let filter = vec![
            FilterCondition::eq("actual_completion", serde_json::Value::Null),
            FilterCondition {
                column: "work_order".into(),
                op: FilterOp::Ne,
                value: serde_json::Value::Null,
            },
        ];
        let stmt = planner.build_query(DataType::Maintenance, &filter, None).unwrap();
        assert!(stmt.sql.contains("actual_completion IS NULL"));
        assert!(stmt.sql.contains("work_order IS NOT NULL"));
        assert!(stmt.parameters.is_empty());

        let bad = vec![FilterCondition {
            column: "quantity".into(),
            op: FilterOp::Gt,
            value: serde_json::Value::Null,
        }];
        assert!(matches!(
            planner.build_query(DataType::Logistics, &bad, None),
            Err(PlanError::UnsupportedValue { .. })
        ));
    }

    #[test]
    fn invalid_identifiers_are_rejected() {
        let planner = QueryPlanner::new();
        let filter = vec![FilterCondition::eq("priority; DROP TABLE x", 1)];
        assert_eq!(
            planner.build_query(DataType::Logistics, &filter, None),
            Err(PlanError::InvalidIdentifier("priority; DROP TABLE x".into()))
        );

        let planner = QueryPlanner::new().with_mapping(DataType::Logistics, "supply data");
        assert!(matches!(
            planner.build_query(DataType::Logistics, &[], None),
            Err(PlanError::InvalidIdentifier(_))
        ));

        let planner = QueryPlanner::new().with_schema("1ops");
        assert!(planner.build_query(DataType::Logistics, &[], None).is_err());
    }

    #[test]
    fn source_table_overrides_mapping() {
        let planner = QueryPlanner::new().with_schema("public");
        let mut source = DataSource::new("blade_deployment", DataType::Deployment);
        let stmt = planner.build_query_for_source(&source, &[], None).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM public.blade_deployment_data");

        source.catalog_name = Some("main".into());
        source.schema_name = Some("ops".into());
        source.table_name = Some("deployments".into());
        let stmt = planner.build_query_for_source(&source, &[], Some(5)).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM main.ops.deployments LIMIT 5");
    }

    #[test]
    fn array_values_are_rejected() {
        let planner = QueryPlanner::new();
        let filter = vec![FilterCondition::eq("priority", json!([1, 2]))];
        assert!(matches!(
            planner.build_query(DataType::Logistics, &filter, None),
            Err(PlanError::UnsupportedValue { .. })
        ));
    }
}
