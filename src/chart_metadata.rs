//! §2 C9 / post-hoc chart layout derivation over executed configurations.
//!
//! Grounded on the original `ChartMetadataProvider`: a base price+volume pane
//! per timeframe, then one pass over every transform assigning each a y-axis
//! (price-overlay vs its own panel) and collecting distinct session ranges.
//! The original's axis manager juggles dozens of plot-kind-specific rules;
//! this engine's simplified five-variant `TransformPlotKind` collapses that
//! down to a single rule: `Overlay` shares the price axis, everything else
//! that isn't `None` gets its own panel.

use crate::configuration::TransformConfiguration;
use crate::metadata::TransformPlotKind;
use crate::timeframe::SessionRange;
use std::collections::{HashMap, HashSet};

pub const PRICE_AXIS: u32 = 0;
pub const VOLUME_AXIS: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct YAxis {
    pub top: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SeriesInfo {
    pub id: String,
    pub plot_kind: TransformPlotKind,
    pub name: String,
    pub data_mapping: HashMap<String, String>,
    pub z_index: u32,
    pub y_axis: u32,
    pub linked_to: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartPaneMetadata {
    pub y_axis: Vec<YAxis>,
    pub series: Vec<SeriesInfo>,
    pub session_ranges: Vec<SessionRange>,
}

pub type TimeframeChartMetadata = HashMap<String, ChartPaneMetadata>;

fn candlestick_series() -> SeriesInfo {
    let mut data_mapping = HashMap::new();
    data_mapping.insert("open".to_string(), "o".to_string());
    data_mapping.insert("high".to_string(), "h".to_string());
    data_mapping.insert("low".to_string(), "l".to_string());
    data_mapping.insert("close".to_string(), "c".to_string());
    SeriesInfo {
        id: "candlestick".to_string(),
        plot_kind: TransformPlotKind::Overlay,
        name: "Price".to_string(),
        data_mapping,
        z_index: 0,
        y_axis: PRICE_AXIS,
        linked_to: None,
    }
}

fn volume_series() -> SeriesInfo {
    let mut data_mapping = HashMap::new();
    data_mapping.insert("volume".to_string(), "v".to_string());
    SeriesInfo {
        id: "volume".to_string(),
        plot_kind: TransformPlotKind::Histogram,
        name: "Volume".to_string(),
        data_mapping,
        z_index: 0,
        y_axis: VOLUME_AXIS,
        linked_to: None,
    }
}

/// Recomputes even top/height splits across `panel_count` panels below the
/// fixed price+volume pair (price 60%, volume 20%, remaining panels share
/// the last 20% evenly).
fn recompute_axes(panel_count: usize) -> Vec<YAxis> {
    let mut axes = vec![
        YAxis { top: 0, height: 60 },
        YAxis { top: 60, height: 20 },
    ];
    if panel_count == 0 {
        return axes;
    }
    let remaining = 20u32;
    let each = (remaining / panel_count as u32).max(1);
    let mut top = 80u32;
    for _ in 0..panel_count {
        axes.push(YAxis { top, height: each });
        top += each;
    }
    axes
}

/// Builds per-timeframe chart layout: a base candlestick+volume pane for
/// every requested timeframe, then one series per transform whose
/// `plot_kind` is not `None`, in configuration order.
pub fn build_chart_metadata(
    timeframes: &HashSet<String>,
    transforms: &[TransformConfiguration],
) -> TimeframeChartMetadata {
    let mut panes: TimeframeChartMetadata = HashMap::new();
    for tf in timeframes {
        let mut pane = ChartPaneMetadata::default();
        pane.series.push(candlestick_series());
        pane.series.push(volume_series());
        pane.y_axis = recompute_axes(0);
        panes.insert(tf.clone(), pane);
    }

    let mut output_to_series_id: HashMap<String, String> = HashMap::new();
    let mut session_seen: HashMap<String, HashSet<(i64, i64)>> = HashMap::new();

    for cfg in transforms {
        let tf = cfg.timeframe.canonical();
        let Some(pane) = panes.get_mut(&tf) else {
            tracing::warn!(timeframe = %tf, "timeframe not found in chart metadata");
            continue;
        };

        if let Some(session) = cfg.session {
            let key = (
                session.open.num_seconds_from_midnight() as i64,
                session.close.num_seconds_from_midnight() as i64,
            );
            let seen = session_seen.entry(tf.clone()).or_default();
            if seen.insert(key) {
                pane.session_ranges.push(session);
            }
        }

        let plot_kind = cfg.metadata.plot_kind.unwrap_or(TransformPlotKind::None);
        if plot_kind == TransformPlotKind::None {
            tracing::debug!(transform_id = %cfg.id, "skipping transform with no plot kind");
            continue;
        }

        let (y_axis, linked_to) = match plot_kind {
            TransformPlotKind::Overlay => (PRICE_AXIS, None),
            _ => {
                let linked_to = cfg
                    .node_dependencies()
                    .first()
                    .and_then(|dep| output_to_series_id.get(&dep.column_id()).cloned());
                let panel_count = pane.y_axis.len().saturating_sub(2) + 1;
                pane.y_axis = recompute_axes(panel_count);
                (PRICE_AXIS + panel_count as u32 + 1, linked_to)
            }
        };

        let mut data_mapping = HashMap::new();
        for output in &cfg.metadata.outputs {
            data_mapping.insert(output.id.clone(), cfg.output_id(&output.id));
        }

        pane.series.push(SeriesInfo {
            id: cfg.id.clone(),
            plot_kind,
            name: cfg.metadata.name.clone(),
            data_mapping,
            z_index: pane.series.len() as u32,
            y_axis,
            linked_to,
        });

        for output in &cfg.metadata.outputs {
            output_to_series_id.insert(cfg.output_id(&output.id), cfg.id.clone());
        }
    }

    panes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::InputMapping;
    use crate::metadata::{TransformCategory, TransformsMetaData};
    use crate::timeframe::{TimeUnit, Timeframe};
    use std::sync::Arc;

    fn cfg(id: &str, plot_kind: Option<TransformPlotKind>) -> TransformConfiguration {
        TransformConfiguration {
            metadata: Arc::new(TransformsMetaData {
                id: "sma".to_string(),
                name: "SMA".to_string(),
                category: Some(TransformCategory::Trend),
                plot_kind,
                ..Default::default()
            }),
            id: id.to_string(),
            options: HashMap::new(),
            inputs: InputMapping::new(),
            timeframe: Timeframe::new(TimeUnit::Day, 1),
            session: None,
        }
    }

    #[test]
    fn base_pane_has_price_and_volume() {
        let timeframes: HashSet<String> = ["1D".to_string()].into_iter().collect();
        let panes = build_chart_metadata(&timeframes, &[]);
        let pane = &panes["1D"];
        assert_eq!(pane.series.len(), 2);
        assert_eq!(pane.y_axis.len(), 2);
    }

    #[test]
    fn overlay_transform_joins_price_axis_without_new_panel() {
        let timeframes: HashSet<String> = ["1D".to_string()].into_iter().collect();
        let transforms = vec![cfg("s1", Some(TransformPlotKind::Overlay))];
        let panes = build_chart_metadata(&timeframes, &transforms);
        let pane = &panes["1D"];
        assert_eq!(pane.y_axis.len(), 2);
        assert_eq!(pane.series.last().unwrap().y_axis, PRICE_AXIS);
    }

    #[test]
    fn panel_transform_gets_its_own_axis() {
        let timeframes: HashSet<String> = ["1D".to_string()].into_iter().collect();
        let transforms = vec![cfg("s1", Some(TransformPlotKind::Panel))];
        let panes = build_chart_metadata(&timeframes, &transforms);
        let pane = &panes["1D"];
        assert_eq!(pane.y_axis.len(), 3);
    }

    #[test]
    fn none_plot_kind_produces_no_series() {
        let timeframes: HashSet<String> = ["1D".to_string()].into_iter().collect();
        let transforms = vec![cfg("s1", Some(TransformPlotKind::None))];
        let panes = build_chart_metadata(&timeframes, &transforms);
        assert_eq!(panes["1D"].series.len(), 2);
    }
}
