use crate::config::SelectorConfig;
use crate::models::{HighPerformers, MessageGroup};

/// max(mean × multiplier, floor). An empty dataset falls back to the floor.
pub fn threshold(dataset_mean: Option<f64>, config: &SelectorConfig) -> f64 {
    let relative = dataset_mean.unwrap_or(0.0) * config.mean_multiplier;
    relative.max(config.floor_percent)
}

/// Number of top-ranked groups eligible for selection.
pub fn eligible_count(group_count: usize, config: &SelectorConfig) -> usize {
    if group_count == 0 {
        return 0;
    }
    if group_count < config.min_groups_for_fraction {
        return 1;
    }
    ((group_count as f64 * config.top_fraction).floor() as usize).max(1)
}

/// Picks groups that clear the threshold and sit inside the eligible top
/// ranks. `ranked` must already be in [`crate::aggregate::rank_groups`] order,
/// which also breaks ties at the boundary.
pub fn select_high_performers(
    ranked: &[MessageGroup],
    dataset_mean: Option<f64>,
    config: &SelectorConfig,
) -> HighPerformers {
    let threshold = threshold(dataset_mean, config);
    let eligible = eligible_count(ranked.len(), config);

    let groups = ranked
        .iter()
        .take(eligible)
        .filter(|group| group.average_click_rate >= threshold)
        .cloned()
        .collect();

    HighPerformers {
        dataset_mean,
        floor_percent: config.floor_percent,
        threshold,
        eligible_count: eligible,
        groups,
    }
}
