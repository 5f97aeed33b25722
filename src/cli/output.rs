//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{OutputFormat, ShardgateArgs};
use crate::config::GatewayConfig;
use crate::dispatch::DispatchMetrics;
use crate::error::Result;
use crate::stats::{IndexCount, MergedStats};
use crate::types::Candidate;

/// Result of a simulated cluster run.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub agents: usize,
    pub objects: usize,
    pub dimension: usize,
    pub deployment: String,
    pub queries: SearchSummary,
    /// Top results of the first successful query.
    pub sample_results: Vec<Candidate>,
    pub index_count: IndexCount,
    pub statistics: MergedStats,
    pub metrics: DispatchMetrics,
}

/// Outcome of the simulated queries.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub queries_per_second: f64,
    pub errors: Vec<String>,
}

/// Result of validating a configuration file.
#[derive(Debug, Serialize)]
pub struct ConfigCheckResult {
    pub path: String,
    pub valid: bool,
    pub error: Option<String>,
    pub config: Option<GatewayConfig>,
}

/// Output a result in the specified format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &ShardgateArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
        OutputFormat::Yaml => output_yaml(result),
    }
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &ShardgateArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }

    let value = serde_json::to_value(result)?;
    print_human_value(&value, 0, args.verbosity());
    Ok(())
}

/// Print nested objects as indented sections. Below verbosity 2, arrays of
/// objects are summarized by their length.
fn print_human_value(value: &serde_json::Value, indent: usize, verbosity: u8) {
    let spaces = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(inner) if !inner.is_empty() => {
                        println!("{spaces}{key}:");
                        print_human_value(val, indent + 1, verbosity);
                    }
                    serde_json::Value::Array(items)
                        if items.iter().any(|item| item.is_object()) =>
                    {
                        if verbosity >= 2 {
                            println!("{spaces}{key}:");
                            for item in items {
                                println!("{spaces}  -");
                                print_human_value(item, indent + 2, verbosity);
                            }
                        } else {
                            let count = items.len();
                            println!("{spaces}{key}: {count} entries");
                        }
                    }
                    _ => {
                        let formatted_val = format_value(val);
                        println!("{spaces}{key}: {formatted_val}");
                    }
                }
            }
        }
        _ => {
            let formatted_value = format_value(value);
            println!("{spaces}{formatted_value}");
        }
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &ShardgateArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

/// Output in YAML format.
fn output_yaml<T: Serialize>(result: &T) -> Result<()> {
    let value = serde_json::to_value(result)?;
    print_yaml_value(&value, 0);
    Ok(())
}

/// Print YAML value with indentation.
fn print_yaml_value(value: &serde_json::Value, indent: usize) {
    let spaces = "  ".repeat(indent);

    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{spaces}{key}:");
                        print_yaml_value(val, indent + 1);
                    }
                    _ => {
                        let formatted_yaml_val = format_yaml_value(val);
                        println!("{spaces}{key}: {formatted_yaml_val}");
                    }
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr {
                match item {
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        println!("{spaces}-");
                        print_yaml_value(item, indent + 1);
                    }
                    _ => {
                        let formatted_yaml_item = format_yaml_value(item);
                        println!("{spaces}- {formatted_yaml_item}");
                    }
                }
            }
        }
        _ => {
            let formatted_yaml_value = format_yaml_value(value);
            println!("{spaces}{formatted_yaml_value}");
        }
    }
}

/// Format a scalar JSON value for YAML output.
fn format_yaml_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => {
            if s.is_empty() || s.contains('\n') || s.contains('"') || s.contains(':') {
                let escaped = s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
                format!("\"{escaped}\"")
            } else {
                s.clone()
            }
        }
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        _ => "~".to_string(),
    }
}

/// Format a JSON value for display.
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let formatted_values = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
            format!("[{formatted_values}]")
        }
        serde_json::Value::Object(_) => "{}".to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&serde_json::json!("agent-0")), "agent-0");
        assert_eq!(format_value(&serde_json::json!(42)), "42");
        assert_eq!(format_value(&serde_json::json!([1, 2, 3])), "[1, 2, 3]");
        assert_eq!(format_value(&serde_json::Value::Null), "-");
    }

    #[test]
    fn test_format_yaml_value() {
        assert_eq!(format_yaml_value(&serde_json::json!("plain")), "plain");
        assert_eq!(
            format_yaml_value(&serde_json::json!("agent-0,agent-1: x")),
            "\"agent-0,agent-1: x\""
        );
        assert_eq!(format_yaml_value(&serde_json::json!("")), "\"\"");
        assert_eq!(format_yaml_value(&serde_json::json!(true)), "true");
    }

    #[test]
    fn test_search_summary_serializes() {
        let summary = SearchSummary {
            total: 2,
            succeeded: 1,
            failed: 1,
            errors: vec!["quorum not met".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["failed"], 1);
        assert_eq!(value["errors"][0], "quorum not met");
    }
}
