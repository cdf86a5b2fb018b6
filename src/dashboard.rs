//! Dashboard driver: runs the selection reducer and executes its commands.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::cycles::CycleAggregator;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::metadata::{load_base_table, FilterOptions};
use crate::plot::{render, PlotOutput, NO_DATA_MESSAGE};
use crate::query::{MemorySource, QueryCache, QueryClient, QuerySource, RedashSource};
use crate::selection::{reduce, Command, Phase, SelectionEvent, SelectionState};
use crate::table::Table;

/// Everything a front end needs to draw after an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub phase: Phase,
    pub status: String,
    pub search_info: Option<String>,
    /// Warnings raised by the last dispatched event
    pub warnings: Vec<String>,
    pub plot: PlotOutput,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            phase: Phase::NoSelection,
            status: "No cells selected".to_string(),
            search_info: None,
            warnings: Vec::new(),
            plot: PlotOutput::Placeholder(NO_DATA_MESSAGE.to_string()),
        }
    }
}

/// Query client over the live service, or over a fixture file when one is
/// given.
pub fn client_from_config(cfg: &Config, fixtures: Option<&Path>) -> Result<QueryClient> {
    let source: Arc<dyn QuerySource> = match fixtures {
        Some(path) => {
            log(
                Level::Info,
                Domain::System,
                "source",
                obj(&[("type", v_str("fixtures")), ("path", v_str(&path.display().to_string()))]),
            );
            Arc::new(MemorySource::from_file(path)?)
        }
        None => {
            cfg.validate()?;
            log(
                Level::Info,
                Domain::System,
                "source",
                obj(&[("type", v_str("redash")), ("url", v_str(&cfg.redash_url))]),
            );
            Arc::new(RedashSource::from_config(cfg)?)
        }
    };
    let cache = QueryCache::new(cfg.cache_ttl(), cfg.max_cache_entries);
    Ok(QueryClient::new(source, Arc::new(Mutex::new(cache))))
}

pub struct Dashboard {
    aggregator: CycleAggregator,
    state: SelectionState,
    view: DashboardView,
}

impl Dashboard {
    pub fn new(aggregator: CycleAggregator, base: Table, cfg: &Config) -> Self {
        Self {
            aggregator,
            state: SelectionState::new(base, cfg.columns.clone(), cfg.auto_load),
            view: DashboardView::default(),
        }
    }

    /// Load the cell table once and build the dashboard around it.
    pub async fn start(client: QueryClient, cfg: &Config) -> Self {
        let base = load_base_table(&client, cfg).await;
        let aggregator = CycleAggregator::from_config(client, cfg);
        let dashboard = Self::new(aggregator, base, cfg);
        log(
            Level::Info,
            Domain::System,
            "dashboard_started",
            obj(&[
                ("cells", json!(dashboard.state.base.height())),
                ("filters", json!(dashboard.state.filter_options.len())),
            ]),
        );
        dashboard
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn view(&self) -> &DashboardView {
        &self.view
    }

    pub fn filter_options(&self) -> &[FilterOptions] {
        &self.state.filter_options
    }

    /// Apply one event. Cycle fetches requested by the reducer run here,
    /// in order, and their results are fed back before returning.
    pub async fn dispatch(&mut self, event: SelectionEvent) -> &DashboardView {
        self.view.warnings.clear();
        let mut queue: VecDeque<Command> = reduce(&mut self.state, event).into();

        while let Some(command) = queue.pop_front() {
            match command {
                Command::FetchCycles {
                    generation,
                    ids,
                    metadata,
                } => {
                    let table = self.aggregator.get_cycle_data(&ids, Some(&metadata)).await;
                    let follow_up =
                        reduce(&mut self.state, SelectionEvent::CyclesLoaded { generation, table });
                    queue.extend(follow_up);
                }
                Command::Status(status) => self.view.status = status,
                Command::SearchInfo(info) => self.view.search_info = info,
                Command::Warning { domain, message } => {
                    log(
                        Level::Warn,
                        domain,
                        "user_warning",
                        obj(&[("message", v_str(&message))]),
                    );
                    self.view.warnings.push(message);
                }
                Command::RenderPlot => {
                    self.view.plot = render(&self.state.data, &self.state.plot, &self.state.styles);
                }
                Command::ShowPlaceholder(message) => {
                    self.view.plot = PlotOutput::Placeholder(message);
                }
            }
        }

        self.view.phase = self.state.phase;
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParams;
    use serde_json::json;

    fn source() -> Arc<MemorySource> {
        let source = MemorySource::new();
        source.insert(
            "24",
            QueryParams::new(),
            &[
                json!({"cell_id": 1, "cell_name": "c1", "design_name": "A", "regular_cycles": 25}),
                json!({"cell_id": 2, "cell_name": "c2", "design_name": "B", "regular_cycles": 30}),
            ],
        );
        source.insert(
            "28",
            QueryParams::new().with("cell_ids", "1"),
            &[
                json!({"cell_id": 1, "regular_cycle_number": 1, "discharge_capacity": 2.0}),
                json!({"cell_id": 1, "regular_cycle_number": 2, "discharge_capacity": 1.9}),
            ],
        );
        source.insert("28", QueryParams::new().with("cell_ids", "2"), &[]);
        Arc::new(source)
    }

    async fn dashboard() -> Dashboard {
        let cfg = Config::default();
        let cache = QueryCache::new(cfg.cache_ttl(), cfg.max_cache_entries);
        let client = QueryClient::new(source(), Arc::new(Mutex::new(cache)));
        Dashboard::start(client, &cfg).await
    }

    #[tokio::test]
    async fn test_select_load_render() {
        let mut d = dashboard().await;
        assert_eq!(d.state().base.height(), 2);

        d.dispatch(SelectionEvent::RowsSelected(vec![0])).await;
        let view = d.dispatch(SelectionEvent::LoadRequested).await;
        assert_eq!(view.phase, Phase::DataLoaded);
        assert_eq!(view.status, "1 cells selected");
        match &view.plot {
            PlotOutput::Figure(f) => {
                assert_eq!(f.trace_names(), vec!["1"]);
                assert_eq!(f.data[0].y.len(), 2);
            }
            other => panic!("expected a figure, got {:?}", other),
        }
        // metadata joined into the cycle table
        assert!(d.state().data.has_column("design_name"));
    }

    #[tokio::test]
    async fn test_empty_cycles_show_no_data() {
        let mut d = dashboard().await;
        d.dispatch(SelectionEvent::RowsSelected(vec![1])).await;
        let view = d.dispatch(SelectionEvent::LoadRequested).await;
        assert_eq!(view.phase, Phase::NoData);
        assert_eq!(view.plot, PlotOutput::Placeholder(NO_DATA_MESSAGE.to_string()));
    }

    #[tokio::test]
    async fn test_warnings_reset_per_event() {
        let mut d = dashboard().await;
        let view = d.dispatch(SelectionEvent::SearchSubmitted("colour:red".into())).await;
        assert_eq!(view.warnings, vec!["Column 'colour' not found"]);
        let view = d.dispatch(SelectionEvent::SearchCleared).await;
        assert!(view.warnings.is_empty());
        assert_eq!(view.search_info, None);
    }

    #[tokio::test]
    async fn test_out_of_view_row_warns() {
        let mut d = dashboard().await;
        let view = d.dispatch(SelectionEvent::RowsSelected(vec![0, 5])).await;
        assert_eq!(view.warnings, vec!["Row 5 is not in the current view"]);
        assert_eq!(view.phase, Phase::RowsSelected);
    }
}
