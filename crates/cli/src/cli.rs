use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use blade_core::{FilterCondition, FilterOp};

/// Sync BLADE warehouse records into the catalog.
#[derive(Parser, Debug)]
#[command(name = "blade-sync", version, about = "Sync BLADE warehouse records into the catalog")]
pub struct CliArgs {
    /// Config profile (`PROD` resolves `PROD_<KEY>` before `<KEY>`)
    #[arg(long, env = "BLADE_PROFILE", global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync session for a data source
    Sync(SyncArgs),

    /// Print the warehouse query a data type would run
    Plan {
        /// maintenance, sortie, deployment or logistics
        #[arg(long)]
        data_type: String,

        /// Filter as `column<op>value`, e.g. `base=Ramstein` or `hours>=2.5`
        #[arg(long = "where", value_parser = parse_filter)]
        filters: Vec<FilterCondition>,

        #[arg(long)]
        limit: Option<u64>,
    },

    /// Fetch one record from the warehouse and show it as it would upload
    Item {
        #[arg(long)]
        data_type: String,

        /// Value of the row's `item_id` column
        #[arg(long)]
        id: String,
    },

    /// List data sources and their sync statistics
    Sources,

    /// Print the effective configuration without secrets
    Config,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct SyncArgs {
    /// Data source id
    #[arg(long)]
    pub source: Option<Uuid>,

    /// Data source type_name
    #[arg(long)]
    pub name: Option<String>,
}

/// Parse `column<op>value`. Values that read as JSON scalars (numbers,
/// booleans, null) are bound as such, everything else as text.
pub fn parse_filter(raw: &str) -> Result<FilterCondition, String> {
    // Two-character operators first so `>=` is not read as `>`.
    const OPS: [(&str, FilterOp); 6] = [
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        ("!=", FilterOp::Ne),
        ("=", FilterOp::Eq),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
    ];

    let (pos, token, op) = OPS
        .iter()
        .filter_map(|(token, op)| raw.find(token).map(|pos| (pos, *token, *op)))
        .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
        .ok_or_else(|| format!("'{raw}' has no comparison operator"))?;

    let column = raw[..pos].trim();
    if column.is_empty() {
        return Err(format!("'{raw}' has no column"));
    }
    let text = raw[pos + token.len()..].trim();
    let value = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_) | serde_json::Value::Null)) => v,
        _ => serde_json::Value::String(text.to_string()),
    };

    Ok(FilterCondition {
        column: column.to_string(),
        op,
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_operators() {
        let cases = [
            ("base=Ramstein", "base", FilterOp::Eq, json!("Ramstein")),
            ("hours>=2.5", "hours", FilterOp::Ge, json!(2.5)),
            ("qty<=10", "qty", FilterOp::Le, json!(10)),
            ("status!=closed", "status", FilterOp::Ne, json!("closed")),
            ("priority>1", "priority", FilterOp::Gt, json!(1)),
            ("done = false", "done", FilterOp::Eq, json!(false)),
            ("tail=null", "tail", FilterOp::Eq, json!(null)),
        ];
        for (raw, column, op, value) in cases {
            let f = parse_filter(raw).unwrap();
            assert_eq!(f.column, column, "{raw}");
            assert_eq!(f.op, op, "{raw}");
            assert_eq!(f.value, value, "{raw}");
        }
    }

    #[test]
    fn value_may_contain_operators() {
        let f = parse_filter("note=a=b").unwrap();
        assert_eq!(f.column, "note");
        assert_eq!(f.value, json!("a=b"));
    }

    #[test]
    fn rejects_missing_parts() {
        assert!(parse_filter("justtext").is_err());
        assert!(parse_filter("=5").is_err());
    }

    #[test]
    fn sync_requires_exactly_one_selector() {
        assert!(CliArgs::try_parse_from(["blade-sync", "sync"]).is_err());
        let nil = Uuid::nil().to_string();
        assert!(CliArgs::try_parse_from(["blade-sync", "sync", "--name", "a", "--source", nil.as_str()]).is_err());

        let args = CliArgs::try_parse_from(["blade-sync", "sync", "--name", "blade_sortie"]).unwrap();
        match args.command {
            Command::Sync(s) => assert_eq!(s.name.as_deref(), Some("blade_sortie")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn item_takes_type_and_id() {
        let args = CliArgs::try_parse_from(["blade-sync", "item", "--data-type", "sortie", "--id", "S-9"]).unwrap();
        match args.command {
            Command::Item { data_type, id } => {
                assert_eq!(data_type, "sortie");
                assert_eq!(id, "S-9");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(CliArgs::try_parse_from(["blade-sync", "item", "--data-type", "sortie"]).is_err());
    }

    #[test]
    fn plan_collects_filters() {
        let args = CliArgs::try_parse_from([
            "blade-sync", "plan", "--data-type", "sortie", "--where", "base=X", "--where", "hours>1", "--limit", "5",
        ])
        .unwrap();
        match args.command {
            Command::Plan { data_type, filters, limit } => {
                assert_eq!(data_type, "sortie");
                assert_eq!(filters.len(), 2);
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
