use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Default series colors, assigned by group order.
pub const PALETTE: [&str; 10] = [
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A",
    "#19D3F3", "#FF6692", "#B6E880", "#FF97FF", "#FECB52",
];

pub fn palette_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlotKind {
    Line,
    Scatter,
    #[default]
    LineMarkers,
    Bar,
}

impl PlotKind {
    /// Scatter-trace mode; `None` for bars.
    pub fn mode(&self) -> Option<&'static str> {
        match self {
            PlotKind::Line => Some("lines"),
            PlotKind::Scatter => Some("markers"),
            PlotKind::LineMarkers => Some("lines+markers"),
            PlotKind::Bar => None,
        }
    }
}

impl FromStr for PlotKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" | "lines" => Ok(PlotKind::Line),
            "scatter" | "markers" => Ok(PlotKind::Scatter),
            "line+markers" | "lines+markers" | "line_markers" => Ok(PlotKind::LineMarkers),
            "bar" => Ok(PlotKind::Bar),
            other => Err(format!("unknown plot kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineDash {
    #[default]
    Solid,
    Dash,
    Dot,
    DashDot,
}

impl LineDash {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineDash::Solid => "solid",
            LineDash::Dash => "dash",
            LineDash::Dot => "dot",
            LineDash::DashDot => "dashdot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerSymbol {
    #[default]
    Circle,
    Square,
    Diamond,
    TriangleUp,
    Cross,
    X,
}

impl MarkerSymbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerSymbol::Circle => "circle",
            MarkerSymbol::Square => "square",
            MarkerSymbol::Diamond => "diamond",
            MarkerSymbol::TriangleUp => "triangle-up",
            MarkerSymbol::Cross => "cross",
            MarkerSymbol::X => "x",
        }
    }
}

/// Per-series overrides. `None` for the dash or the symbol hides that part
/// of the series; `color: None` keeps the palette color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStyle {
    pub visible: bool,
    pub line_dash: Option<LineDash>,
    pub line_width: u32,
    pub marker_symbol: Option<MarkerSymbol>,
    pub marker_size: u32,
    pub color: Option<String>,
}

impl Default for SeriesStyle {
    fn default() -> Self {
        Self {
            visible: true,
            line_dash: Some(LineDash::Solid),
            line_width: 2,
            marker_symbol: Some(MarkerSymbol::Circle),
            marker_size: 6,
            color: None,
        }
    }
}

/// Series overrides keyed by the group value's text.
pub type SeriesStyles = BTreeMap<String, SeriesStyle>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    #[default]
    Linear,
    Log,
}

impl AxisScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisScale::Linear => "linear",
            AxisScale::Log => "log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vertical {
    Top,
    Center,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizontal {
    Left,
    Center,
    Right,
}

/// Compass-style legend placement such as "top right".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegendPosition {
    pub vertical: Vertical,
    pub horizontal: Horizontal,
}

impl Default for LegendPosition {
    fn default() -> Self {
        Self {
            vertical: Vertical::Top,
            horizontal: Horizontal::Right,
        }
    }
}

impl FromStr for LegendPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let mut parts = lower.split_whitespace();
        let vertical = match parts.next() {
            Some("top") => Vertical::Top,
            Some("center") => Vertical::Center,
            Some("bottom") => Vertical::Bottom,
            _ => return Err(format!("unknown legend position '{}'", s)),
        };
        let horizontal = match parts.next() {
            Some("left") => Horizontal::Left,
            Some("center") => Horizontal::Center,
            Some("right") => Horizontal::Right,
            _ => return Err(format!("unknown legend position '{}'", s)),
        };
        Ok(Self {
            vertical,
            horizontal,
        })
    }
}

impl LegendPosition {
    /// Anchor coordinates `(x, y, xanchor, yanchor)` in paper space.
    pub fn anchor(&self) -> (f64, f64, &'static str, &'static str) {
        let (y, yanchor) = match self.vertical {
            Vertical::Top => (1.0, "top"),
            Vertical::Center => (0.5, "middle"),
            Vertical::Bottom => (0.0, "bottom"),
        };
        let (x, xanchor) = match self.horizontal {
            Horizontal::Left => (0.0, "left"),
            Horizontal::Center => (0.5, "center"),
            Horizontal::Right => (1.0, "right"),
        };
        (x, y, xanchor, yanchor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl AxisRange {
    pub fn is_set(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }
}

/// Global figure options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutOptions {
    pub title: Option<String>,
    pub title_font_size: u32,
    pub axis_font_size: u32,
    pub x_title: Option<String>,
    pub y_title: Option<String>,
    pub x_scale: AxisScale,
    pub y_scale: AxisScale,
    pub x_range: AxisRange,
    pub y_range: AxisRange,
    pub show_grid: bool,
    pub grid_color: String,
    pub show_legend: bool,
    pub legend_position: LegendPosition,
    pub height: u32,
    pub width: u32,
    pub template: String,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            title: None,
            title_font_size: 16,
            axis_font_size: 12,
            x_title: None,
            y_title: None,
            x_scale: AxisScale::Linear,
            y_scale: AxisScale::Linear,
            x_range: AxisRange::default(),
            y_range: AxisRange::default(),
            show_grid: true,
            grid_color: "#e0e0e0".to_string(),
            show_legend: true,
            legend_position: LegendPosition::default(),
            height: 600,
            width: 800,
            template: "plotly".to_string(),
        }
    }
}

/// What to plot and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSettings {
    pub x: String,
    pub y: Option<String>,
    pub group_by: String,
    pub kind: PlotKind,
    pub layout: LayoutOptions,
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            x: "regular_cycle_number".to_string(),
            y: Some("discharge_capacity".to_string()),
            group_by: "cell_id".to_string(),
            kind: PlotKind::default(),
            layout: LayoutOptions::default(),
        }
    }
}
