//! Figure rendering.
//!
//! Produces a Plotly-compatible JSON document (`{"data": [...], "layout":
//! {...}}`): one trace per distinct value of the group-by column. Groups are
//! ordered (numerically when every label is a number) so that each group
//! keeps its palette color for as long as the set of groups is unchanged.

pub mod style;

use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::schema::humanize;
use crate::table::Table;

pub use style::{
    palette_color, AxisRange, AxisScale, LayoutOptions, LegendPosition, LineDash, MarkerSymbol,
    PlotKind, PlotSettings, SeriesStyle, SeriesStyles, PALETTE,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    #[serde(rename = "type")]
    pub trace_type: String,
    pub name: String,
    pub x: Vec<Value>,
    pub y: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<LineStyle>,
    pub marker: MarkerStyle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hovertemplate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Figure {
    pub data: Vec<Trace>,
    pub layout: Value,
}

impl Figure {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn trace_names(&self) -> Vec<&str> {
        self.data.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotOutput {
    Figure(Figure),
    /// No figure; the text explains why.
    Placeholder(String),
}

pub const NO_DATA_MESSAGE: &str = "No cycle data available. Please select cells first.";
pub const NO_Y_AXIS_MESSAGE: &str = "Select a Y-axis column to plot.";

fn compare_labels(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Row indices per group label, in label order.
fn partition(table: &Table, group_by: &str) -> Vec<(String, Vec<usize>)> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for row in table.iter_rows() {
        let label = row.text(group_by).unwrap_or_else(|| "null".to_string());
        groups.entry(label).or_default().push(row.index());
    }
    let mut out: Vec<(String, Vec<usize>)> = groups.into_iter().collect();
    let all_numeric = out.iter().all(|(l, _)| l.parse::<f64>().is_ok());
    if all_numeric {
        out.sort_by(|(a, _), (b, _)| compare_labels(a, b));
    }
    out
}

fn axis_layout(
    title: &str,
    scale: AxisScale,
    range: &AxisRange,
    opts: &LayoutOptions,
) -> Value {
    let mut axis = json!({
        "title": {"text": title, "font": {"size": opts.axis_font_size}},
        "type": scale.as_str(),
        "showgrid": opts.show_grid,
    });
    if opts.show_grid {
        axis["gridcolor"] = json!(opts.grid_color);
    }
    if range.is_set() {
        axis["range"] = json!([range.min, range.max]);
    }
    axis
}

fn layout(settings: &PlotSettings, y: &str) -> Value {
    let opts = &settings.layout;
    let x_title = opts
        .x_title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| humanize(&settings.x));
    let y_title = opts
        .y_title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| humanize(y));

    let (legend_x, legend_y, xanchor, yanchor) = opts.legend_position.anchor();
    let mut layout = json!({
        "template": opts.template,
        "legend": {
            "title": {"text": humanize(&settings.group_by)},
            "x": legend_x,
            "y": legend_y,
            "xanchor": xanchor,
            "yanchor": yanchor,
        },
        "xaxis": axis_layout(&x_title, opts.x_scale, &opts.x_range, opts),
        "yaxis": axis_layout(&y_title, opts.y_scale, &opts.y_range, opts),
        "showlegend": opts.show_legend,
        "height": opts.height,
        "width": opts.width,
    });
    if let Some(title) = opts.title.as_ref().filter(|t| !t.trim().is_empty()) {
        layout["title"] = json!({"text": title, "font": {"size": opts.title_font_size}});
    }
    layout
}

fn build_trace(
    table: &Table,
    rows: &[usize],
    label: &str,
    color: &str,
    style: &SeriesStyle,
    settings: &PlotSettings,
    y: &str,
) -> Trace {
    let pick = |col: &str| -> Vec<Value> {
        rows.iter()
            .map(|&r| table.value(r, col).unwrap_or(Value::Null))
            .collect()
    };
    let x_vals = pick(&settings.x);
    let y_vals = pick(y);

    if settings.kind == PlotKind::Bar {
        return Trace {
            trace_type: "bar".to_string(),
            name: label.to_string(),
            x: x_vals,
            y: y_vals,
            mode: None,
            line: None,
            marker: MarkerStyle {
                symbol: None,
                size: None,
                color: color.to_string(),
            },
            hovertemplate: None,
        };
    }

    let line = LineStyle {
        dash: style.line_dash.map(|d| d.as_str().to_string()),
        width: style.line_dash.map(|_| style.line_width),
        color: color.to_string(),
    };
    let marker = MarkerStyle {
        symbol: style.marker_symbol.map(|m| m.as_str().to_string()),
        size: style.marker_symbol.map(|_| style.marker_size),
        color: color.to_string(),
    };
    Trace {
        trace_type: "scatter".to_string(),
        name: label.to_string(),
        x: x_vals,
        y: y_vals,
        mode: settings.kind.mode().map(str::to_string),
        line: Some(line),
        marker,
        hovertemplate: Some(format!(
            "{}: {}<br>{}: %{{x}}<br>{}: %{{y:.2f}}<extra></extra>",
            humanize(&settings.group_by),
            label,
            settings.x,
            y
        )),
    }
}

/// Render one trace per group, or a placeholder when there is nothing to
/// draw.
pub fn render(table: &Table, settings: &PlotSettings, styles: &SeriesStyles) -> PlotOutput {
    if table.is_empty() {
        return PlotOutput::Placeholder(NO_DATA_MESSAGE.to_string());
    }
    let Some(y) = settings.y.as_deref().filter(|y| !y.is_empty()) else {
        return PlotOutput::Placeholder(NO_Y_AXIS_MESSAGE.to_string());
    };
    for col in [settings.x.as_str(), y, settings.group_by.as_str()] {
        if !table.has_column(col) {
            return PlotOutput::Placeholder(format!("Column '{}' is not in the loaded data.", col));
        }
    }

    let _scope = ProfileScope::new("plot.render");
    let default_style = SeriesStyle::default();
    let mut data = Vec::new();
    let mut hidden = 0usize;
    for (index, (label, rows)) in partition(table, &settings.group_by).into_iter().enumerate() {
        let style = styles.get(&label).unwrap_or(&default_style);
        if !style.visible {
            hidden += 1;
            continue;
        }
        let color = style
            .color
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| palette_color(index).to_string());
        data.push(build_trace(table, &rows, &label, &color, style, settings, y));
    }

    log(
        Level::Debug,
        Domain::Plot,
        "rendered",
        obj(&[
            ("x", v_str(&settings.x)),
            ("y", v_str(y)),
            ("group_by", v_str(&settings.group_by)),
            ("traces", json!(data.len())),
            ("hidden", json!(hidden)),
        ]),
    );
    PlotOutput::Figure(Figure {
        data,
        layout: layout(settings, y),
    })
}
