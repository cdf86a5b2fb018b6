use anyhow::{anyhow, bail, Result};
use serde_json::json;
use std::path::PathBuf;

use battery_analytics::config::Config;
use battery_analytics::dashboard::{client_from_config, Dashboard};
use battery_analytics::logging::{log, obj, v_str, Domain, Level};
use battery_analytics::plot::PlotKind;
use battery_analytics::selection::{Phase, SelectionEvent};

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    command: String,
    filters: Vec<(String, String)>,
    search: Option<String>,
    columns: Option<Vec<String>>,
    select: Vec<usize>,
    x: Option<String>,
    y: Option<String>,
    group: Option<String>,
    kind: Option<PlotKind>,
    fixtures: Option<PathBuf>,
    analysis: bool,
}

fn print_usage() {
    eprintln!("Usage: battery-analytics <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  cells     Filtered cell table");
    eprintln!("  filters   Dropdown filter options");
    eprintln!("  plot      Load cycle data for selected rows and print the figure");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --filter=<column>=<value>  Dropdown filter (repeatable)");
    eprintln!("  --search=<query>           e.g. \"design_name:A regular_cycles:>=100 cycling\"");
    eprintln!("  --columns=<a,b,...>        Displayed columns");
    eprintln!("  --select=<0,1,...>         Row indices in the displayed table");
    eprintln!("  --x=<col> --y=<col> --group=<col>");
    eprintln!("  --kind=<line|scatter|line+markers|bar>");
    eprintln!("  --fixtures=<file.json>     Read query results from a file instead of Redash");
    eprintln!("  --analysis                 Aggregate with ML_CYCLE_QUERY_ID instead of CYCLE_QUERY_ID");
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let command = args.first().cloned().ok_or_else(|| anyhow!("missing command"))?;
    if !matches!(command.as_str(), "cells" | "filters" | "plot") {
        bail!("unknown command '{}'", command);
    }
    let mut out = CliArgs {
        command,
        ..Default::default()
    };
    for arg in &args[1..] {
        if let Some(v) = arg.strip_prefix("--filter=") {
            let (col, value) = v
                .split_once('=')
                .ok_or_else(|| anyhow!("--filter expects column=value, got '{}'", v))?;
            out.filters.push((col.trim().to_string(), value.trim().to_string()));
        } else if let Some(v) = arg.strip_prefix("--search=") {
            out.search = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--columns=") {
            out.columns = Some(split_list(v));
        } else if let Some(v) = arg.strip_prefix("--select=") {
            out.select = split_list(v)
                .iter()
                .map(|s| s.parse::<usize>().map_err(|_| anyhow!("bad row index '{}'", s)))
                .collect::<Result<_>>()?;
        } else if let Some(v) = arg.strip_prefix("--x=") {
            out.x = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--y=") {
            out.y = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--group=") {
            out.group = Some(v.to_string());
        } else if let Some(v) = arg.strip_prefix("--kind=") {
            out.kind = Some(v.parse().map_err(|e: String| anyhow!(e))?);
        } else if let Some(v) = arg.strip_prefix("--fixtures=") {
            out.fixtures = Some(PathBuf::from(v));
        } else if arg == "--analysis" {
            out.analysis = true;
        } else {
            bail!("unknown option '{}'", arg);
        }
    }
    Ok(out)
}

/// Replay the command-line choices as dashboard events.
async fn apply_view_args(dashboard: &mut Dashboard, args: &CliArgs) {
    if let Some(columns) = &args.columns {
        dashboard
            .dispatch(SelectionEvent::DisplayColumnsChanged(columns.clone()))
            .await;
    }
    for (column, value) in &args.filters {
        dashboard
            .dispatch(SelectionEvent::FilterChanged {
                column: column.clone(),
                value: value.clone(),
            })
            .await;
    }
    if let Some(search) = &args.search {
        dashboard
            .dispatch(SelectionEvent::SearchSubmitted(search.clone()))
            .await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(a) => a,
        Err(err) => {
            eprintln!("Error: {}", err);
            print_usage();
            std::process::exit(1);
        }
    };

    let mut cfg = Config::from_env();
    if args.analysis {
        cfg.cycle_query_id = cfg
            .analysis_query_id
            .clone()
            .ok_or_else(|| anyhow!("--analysis needs ML_CYCLE_QUERY_ID"))?;
    }
    let client = client_from_config(&cfg, args.fixtures.as_deref())?;
    let mut dashboard = Dashboard::start(client, &cfg).await;

    let output = match args.command.as_str() {
        "filters" => json!({ "filters": dashboard.filter_options() }),
        "cells" => {
            apply_view_args(&mut dashboard, &args).await;
            let state = dashboard.state();
            json!({
                "view": dashboard.view(),
                "columns": state.view.columns(),
                "rows": state.view,
            })
        }
        "plot" => {
            apply_view_args(&mut dashboard, &args).await;
            let mut settings = dashboard.state().plot.clone();
            if let Some(x) = &args.x {
                settings.x = x.clone();
            }
            if args.y.is_some() {
                settings.y = args.y.clone();
            }
            if let Some(group) = &args.group {
                settings.group_by = group.clone();
            }
            if let Some(kind) = args.kind {
                settings.kind = kind;
            }
            dashboard
                .dispatch(SelectionEvent::PlotSettingsChanged(settings))
                .await;
            dashboard
                .dispatch(SelectionEvent::RowsSelected(args.select.clone()))
                .await;
            if dashboard.state().phase == Phase::RowsSelected {
                dashboard.dispatch(SelectionEvent::LoadRequested).await;
            }
            json!({
                "view": dashboard.view(),
                "selected": dashboard.state().selected_ids,
                "axis_options": dashboard.state().schema.axis_options(),
                "group_options": dashboard.state().schema.group_options(),
            })
        }
        other => bail!("unknown command '{}'", other),
    };

    log(
        Level::Info,
        Domain::System,
        "command_done",
        obj(&[("command", v_str(&args.command))]),
    );
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
