//! Selection state machine.
//!
//! Pure reducer: `(&mut SelectionState, SelectionEvent) -> Vec<Command>`.
//! Nothing here performs I/O; cycle loads and rendering are requested
//! through commands and executed by the dashboard driver, which feeds the
//! load result back as [`SelectionEvent::CyclesLoaded`].
//!
//! ```text
//! NoSelection -> Filtered -> RowsSelected -> Loading -> DataLoaded
//!                                                   \-> NoData
//! ```
//!
//! Any change to filters, search or displayed columns goes back to
//! `Filtered` (or `NoSelection` when nothing is applied) with the
//! selection cleared, since row indices are relative to the view.

use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;

use crate::config::ColumnConfig;
use crate::logging::{log, log_transition, obj, v_str, Domain, Level};
use crate::metadata::{
    apply_filters, build_filters, default_display_columns, display_columns, display_view,
    FilterOptions, FilterValues,
};
use crate::plot::{PlotSettings, SeriesStyle, SeriesStyles, NO_DATA_MESSAGE};
use crate::schema::TableSchema;
use crate::search::apply_search;
use crate::table::{EntityId, Table};

pub const DEFAULT_Y: &str = "discharge_capacity";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoSelection,
    Filtered,
    RowsSelected,
    Loading,
    DataLoaded,
    NoData,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoSelection => "no_selection",
            Phase::Filtered => "filtered",
            Phase::RowsSelected => "rows_selected",
            Phase::Loading => "loading",
            Phase::DataLoaded => "data_loaded",
            Phase::NoData => "no_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionEvent {
    FilterChanged { column: String, value: String },
    SearchSubmitted(String),
    SearchCleared,
    DisplayColumnsChanged(Vec<String>),
    /// Row indices into the currently displayed view
    RowsSelected(Vec<usize>),
    LoadRequested,
    CyclesLoaded { generation: u64, table: Table },
    PlotSettingsChanged(PlotSettings),
    SeriesStyleChanged { group: String, style: SeriesStyle },
}

impl SelectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionEvent::FilterChanged { .. } => "filter_changed",
            SelectionEvent::SearchSubmitted(_) => "search_submitted",
            SelectionEvent::SearchCleared => "search_cleared",
            SelectionEvent::DisplayColumnsChanged(_) => "display_columns_changed",
            SelectionEvent::RowsSelected(_) => "rows_selected",
            SelectionEvent::LoadRequested => "load_requested",
            SelectionEvent::CyclesLoaded { .. } => "cycles_loaded",
            SelectionEvent::PlotSettingsChanged(_) => "plot_settings_changed",
            SelectionEvent::SeriesStyleChanged { .. } => "series_style_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FetchCycles {
        generation: u64,
        ids: Vec<EntityId>,
        metadata: Table,
    },
    Status(String),
    SearchInfo(Option<String>),
    /// User-facing warning, logged under the domain that raised it
    Warning {
        domain: Domain,
        message: String,
    },
    RenderPlot,
    ShowPlaceholder(String),
}

#[derive(Debug, Clone)]
pub struct SelectionState {
    pub columns: ColumnConfig,
    pub auto_load: bool,
    pub phase: Phase,
    /// Thresholded cell table, fixed after startup
    pub base: Table,
    pub filter_options: Vec<FilterOptions>,
    pub filters: FilterValues,
    pub search: String,
    pub display: Vec<String>,
    /// Base rows after filters and search, all columns
    pub filtered: Table,
    /// `filtered` projected onto `display`; row indices refer to this
    pub view: Table,
    pub selected_ids: Vec<EntityId>,
    pub selected_metadata: Table,
    pub data: Table,
    pub schema: TableSchema,
    pub plot: PlotSettings,
    pub styles: SeriesStyles,
    /// Bumped on every load request and every selection reset
    pub generation: u64,
}

impl SelectionState {
    pub fn new(base: Table, columns: ColumnConfig, auto_load: bool) -> Self {
        let filter_options = build_filters(&base, &columns.filter_columns);
        let display = default_display_columns(&base, &columns);
        let view = display_view(&base, &display);
        let plot = PlotSettings {
            group_by: columns.id.clone(),
            x: columns.regular_cycle_number.clone(),
            ..PlotSettings::default()
        };
        Self {
            auto_load,
            phase: Phase::NoSelection,
            filtered: base.clone(),
            base,
            filter_options,
            filters: FilterValues::default(),
            search: String::new(),
            display,
            view,
            selected_ids: Vec::new(),
            selected_metadata: Table::empty(),
            data: Table::empty(),
            schema: TableSchema::default(),
            plot,
            styles: SeriesStyles::new(),
            generation: 0,
            columns,
        }
    }

    pub fn status_line(&self) -> String {
        match (self.phase, self.selected_ids.len()) {
            (_, 0) => "No cells selected".to_string(),
            (Phase::Loading, n) => format!("Fetching data for {} cells...", n),
            (_, n) => format!("{} cells selected", n),
        }
    }

    fn idle_phase(&self) -> Phase {
        if self.filters.is_active() || !self.search.trim().is_empty() {
            Phase::Filtered
        } else {
            Phase::NoSelection
        }
    }

    fn clear_selection(&mut self) -> bool {
        let had_data = !self.data.is_empty();
        self.selected_ids.clear();
        self.selected_metadata = Table::empty();
        self.data = Table::empty();
        self.schema = TableSchema::default();
        self.generation += 1;
        had_data
    }
}

pub fn reduce(state: &mut SelectionState, event: SelectionEvent) -> Vec<Command> {
    let mut commands = Vec::new();
    let from = state.phase;
    let trigger = event.name();

    match event {
        SelectionEvent::FilterChanged { column, value } => {
            state.filters.set(&column, &value);
            refilter(state, &mut commands);
        }
        SelectionEvent::SearchSubmitted(query) => {
            state.search = query;
            refilter(state, &mut commands);
        }
        SelectionEvent::SearchCleared => {
            state.search.clear();
            refilter(state, &mut commands);
        }
        SelectionEvent::DisplayColumnsChanged(requested) => {
            state.display = display_columns(&state.base, &state.columns, &requested);
            refilter(state, &mut commands);
        }
        SelectionEvent::RowsSelected(indices) => {
            handle_rows_selected(state, &indices, &mut commands);
            if state.auto_load && !state.selected_ids.is_empty() {
                request_load(state, &mut commands);
            }
        }
        SelectionEvent::LoadRequested => request_load(state, &mut commands),
        SelectionEvent::CyclesLoaded { generation, table } => {
            handle_cycles_loaded(state, generation, table, &mut commands);
        }
        SelectionEvent::PlotSettingsChanged(settings) => {
            state.plot = settings;
            if state.phase == Phase::DataLoaded {
                commands.push(Command::RenderPlot);
            }
        }
        SelectionEvent::SeriesStyleChanged { group, style } => {
            state.styles.insert(group, style);
            if state.phase == Phase::DataLoaded {
                commands.push(Command::RenderPlot);
            }
        }
    }

    if state.phase != from {
        log_transition(from.as_str(), state.phase.as_str(), trigger, state.selected_ids.len());
    }
    commands
}

/// Recompute the filtered view and drop the selection.
fn refilter(state: &mut SelectionState, commands: &mut Vec<Command>) {
    let filtered = apply_filters(&state.base, &state.filters);
    let outcome = apply_search(&filtered, &state.search);
    state.filtered = outcome.table;
    state.view = display_view(&state.filtered, &state.display);

    if state.clear_selection() {
        commands.push(Command::ShowPlaceholder(NO_DATA_MESSAGE.to_string()));
    }
    state.phase = state.idle_phase();

    log(
        Level::Info,
        Domain::Selection,
        "view_refiltered",
        obj(&[
            ("rows", json!(state.view.height())),
            ("of", json!(state.base.height())),
            ("search", v_str(&state.search)),
        ]),
    );
    commands.push(Command::SearchInfo(outcome.info));
    commands.extend(outcome.warnings.into_iter().map(|message| Command::Warning {
        domain: Domain::Search,
        message,
    }));
    commands.push(Command::Status(state.status_line()));
}

/// Map view-relative row indices to cell ids through the displayed table.
fn handle_rows_selected(state: &mut SelectionState, indices: &[usize], commands: &mut Vec<Command>) {
    if state.clear_selection() {
        commands.push(Command::ShowPlaceholder(NO_DATA_MESSAGE.to_string()));
    }

    let id_col = state.columns.id.clone();
    let mut seen = HashSet::new();
    for &idx in indices {
        let id = state
            .view
            .row(idx)
            .and_then(|row| row.text(&id_col))
            .map(EntityId);
        match id {
            Some(id) => {
                if seen.insert(id.clone()) {
                    state.selected_ids.push(id);
                }
            }
            None => commands.push(Command::Warning {
                domain: Domain::Selection,
                message: format!("Row {} is not in the current view", idx),
            }),
        }
    }

    state.selected_metadata = state.filtered.filter(|row| {
        row.text(&id_col)
            .map(|id| seen.contains(&EntityId(id)))
            .unwrap_or(false)
    });
    state.phase = if state.selected_ids.is_empty() {
        state.idle_phase()
    } else {
        Phase::RowsSelected
    };
    commands.push(Command::Status(state.status_line()));
}

fn request_load(state: &mut SelectionState, commands: &mut Vec<Command>) {
    if state.selected_ids.is_empty() {
        commands.push(Command::Status(state.status_line()));
        return;
    }
    state.generation += 1;
    state.phase = Phase::Loading;
    commands.push(Command::Status(state.status_line()));
    commands.push(Command::FetchCycles {
        generation: state.generation,
        ids: state.selected_ids.clone(),
        metadata: state.selected_metadata.clone(),
    });
}

fn handle_cycles_loaded(
    state: &mut SelectionState,
    generation: u64,
    table: Table,
    commands: &mut Vec<Command>,
) {
    if generation != state.generation || state.phase != Phase::Loading {
        log(
            Level::Debug,
            Domain::Selection,
            "stale_load_dropped",
            obj(&[
                ("generation", json!(generation)),
                ("current", json!(state.generation)),
            ]),
        );
        return;
    }

    if table.is_empty() {
        state.data = Table::empty();
        state.schema = TableSchema::default();
        state.phase = Phase::NoData;
        commands.push(Command::Status(format!(
            "No cycle data found for {} selected cells",
            state.selected_ids.len()
        )));
        commands.push(Command::ShowPlaceholder(NO_DATA_MESSAGE.to_string()));
        return;
    }

    state.schema = TableSchema::infer(&table, &state.selected_metadata.columns(), &state.columns);
    state.data = table;
    reconcile_plot_settings(&mut state.plot, &state.schema, &state.columns);
    state.phase = Phase::DataLoaded;
    commands.push(Command::Status(state.status_line()));
    commands.push(Command::RenderPlot);
}

/// Keep axis and group choices that the new data still offers; otherwise
/// fall back to the usual defaults, then to the first numeric column.
pub fn reconcile_plot_settings(plot: &mut PlotSettings, schema: &TableSchema, cols: &ColumnConfig) {
    let axes = schema.axis_options();
    let pick = |current: Option<&str>, preferred: &str| -> Option<String> {
        if let Some(c) = current.filter(|c| axes.iter().any(|a| a == c)) {
            return Some(c.to_string());
        }
        if axes.iter().any(|a| a == preferred) {
            return Some(preferred.to_string());
        }
        axes.first().cloned()
    };

    if let Some(x) = pick(Some(plot.x.as_str()), &cols.regular_cycle_number) {
        plot.x = x;
    }
    plot.y = pick(plot.y.as_deref(), DEFAULT_Y).or(plot.y.take());

    if !schema.group_options().contains(&plot.group_by) {
        plot.group_by = cols.id.clone();
    }
}
