//! §3.12, §4.5.1 / parts of C7 and C9: report ("tearsheet") model, its
//! protobuf-`MergeFrom`-style merge semantics, and the event marker payload.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};

pub const GROUP_KEY: &str = "ALL";

/// One card's single data point; `group`/`group_size` are assigned by the
/// post-processing pass in [`assign_card_groups_and_sizes`], not by the
/// transform that produced the card.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardData {
    pub title: String,
    pub value: String,
    pub group: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardDef {
    pub category: String,
    pub data: Vec<CardData>,
    pub group_size: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartDef {
    pub id: String,
    pub title: String,
    pub payload: serde_json::Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// §3.12/§4.5.1: a tearsheet — repeated fields (`cards`/`charts`/`tables`)
/// merge by append; singular fields (`title`) are overwritten by later
/// values, matching the source system's protobuf `MergeFrom` semantics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub title: Option<String>,
    pub cards: Vec<CardDef>,
    pub charts: Vec<ChartDef>,
    pub tables: Vec<TableDef>,
}

impl Dashboard {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.cards.is_empty() && self.charts.is_empty() && self.tables.is_empty()
    }

    /// Merges `other` into `self` in place: repeated fields append in
    /// encounter order, singular fields are overwritten by `other`'s value
    /// when present.
    pub fn merge_from(&mut self, other: &Dashboard) {
        if other.title.is_some() {
            self.title = other.title.clone();
        }
        self.cards.extend(other.cards.iter().cloned());
        self.charts.extend(other.charts.iter().cloned());
        self.tables.extend(other.tables.iter().cloned());
    }
}

/// §4.5.1 post-processing pass: groups cards by category, sorts each group
/// alphabetically by its first data item's title, and assigns `group`
/// (sorted position) / `group_size` (category cardinality).
pub fn assign_card_groups_and_sizes(dashboard: &mut Dashboard) {
    use std::collections::BTreeMap;

    let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, card) in dashboard.cards.iter().enumerate() {
        by_category.entry(card.category.clone()).or_default().push(i);
    }

    for (_category, mut indices) in by_category {
        indices.sort_by(|&a, &b| {
            let title_a = dashboard.cards[a].data.first().map(|d| d.title.as_str()).unwrap_or("");
            let title_b = dashboard.cards[b].data.first().map(|d| d.title.as_str()).unwrap_or("");
            title_a.cmp(title_b)
        });
        let size = indices.len() as u64;
        for (position, &idx) in indices.iter().enumerate() {
            dashboard.cards[idx].group_size = size;
            for data in &mut dashboard.cards[idx].data {
                data.group = position as u64;
            }
        }
    }
}

/// §3.12: produced by `EventMarker`-category transforms after
/// `transform_data` runs.
#[derive(Clone, Debug, PartialEq)]
pub struct EventMarker {
    pub title: String,
    pub icon: String,
    /// Boolean column in `data` selecting which rows are marked.
    pub select_key: String,
    pub schemas: Vec<String>,
    pub data: Frame,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(category: &str, title: &str) -> CardDef {
        CardDef {
            category: category.to_string(),
            data: vec![CardData {
                title: title.to_string(),
                value: "1".to_string(),
                group: 0,
            }],
            group_size: 0,
        }
    }

    #[test]
    fn merge_appends_repeated_and_overwrites_singular() {
        let mut a = Dashboard {
            title: Some("first".to_string()),
            cards: vec![card("perf", "Sharpe")],
            ..Default::default()
        };
        let b = Dashboard {
            title: Some("second".to_string()),
            cards: vec![card("perf", "Sortino")],
            ..Default::default()
        };
        a.merge_from(&b);
        assert_eq!(a.title, Some("second".to_string()));
        assert_eq!(a.cards.len(), 2);
    }

    #[test]
    fn group_assignment_is_sorted_alphabetically_within_category() {
        let mut dashboard = Dashboard {
            cards: vec![card("perf", "Sortino"), card("perf", "Alpha"), card("risk", "VaR")],
            ..Default::default()
        };
        assign_card_groups_and_sizes(&mut dashboard);
        assert_eq!(dashboard.cards[0].group_size, 2);
        assert_eq!(dashboard.cards[1].group_size, 2);
        assert_eq!(dashboard.cards[2].group_size, 1);
        // "Alpha" < "Sortino": the Alpha card (index 1) must land at group 0.
        assert_eq!(dashboard.cards[1].data[0].group, 0);
        assert_eq!(dashboard.cards[0].data[0].group, 1);
    }
}
