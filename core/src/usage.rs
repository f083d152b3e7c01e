//! Aggregation of active change-request strategy events by segment.
//!
//! The functions here are pure: stores fetch [`PendingStrategyEvent`]s (ideally
//! already narrowed to non-terminal change requests and strategy actions) and
//! hand them over. Activity is re-checked on every event so that in-memory and
//! SQL backed stores share one definition, and so that rows with an
//! unrecognized state are reported and kept (fail closed).

use crate::model::{
    ChangeRequestRef, ChangeRequestStrategy, PendingStrategyEvent, PersistedSegmentUsage,
    SegmentUsage,
};
use crate::payload::SegmentId;
use crate::state::blocks_mutations;
use std::collections::{HashMap, HashSet};

/// Returns `true` if the event's change request can still block mutations.
#[must_use]
pub fn is_pending(event: &PendingStrategyEvent) -> bool {
    blocks_mutations(event.change_request_id, &event.state)
}

/// Returns `true` if any pending event references `segment_id`.
///
/// Stops at the first match.
pub fn any_references_segment<'a, I>(events: I, segment_id: SegmentId) -> bool
where
    I: IntoIterator<Item = &'a PendingStrategyEvent>,
{
    events
        .into_iter()
        .any(|event| event.change.references(segment_id) && is_pending(event))
}

/// Strategies proposed by pending events that reference `segment_id`.
///
/// Proposals that modify the same persisted strategy collapse into one record
/// listing every change request involved. Proposals for strategies that don't
/// exist yet have no stable identity and are returned one per event.
///
/// Records come back in the order their first event was seen.
pub fn strategies_for_segment<'a, I>(events: I, segment_id: SegmentId) -> Vec<ChangeRequestStrategy>
where
    I: IntoIterator<Item = &'a PendingStrategyEvent>,
{
    let mut strategies: Vec<ChangeRequestStrategy> = Vec::new();
    let mut by_strategy_id: HashMap<String, usize> = HashMap::new();

    for event in events {
        if !event.change.references(segment_id) || !is_pending(event) {
            continue;
        }

        let change_request = ChangeRequestRef {
            id: event.change_request_id,
            title: event.change_request_title.clone(),
        };

        if let Some(strategy_id) = event.change.existing_strategy_id() {
            if let Some(&index) = by_strategy_id.get(strategy_id) {
                let existing = &mut strategies[index];
                if !existing.change_requests.iter().any(|cr| cr.id == change_request.id) {
                    existing.change_requests.push(change_request);
                }
                continue;
            }
            by_strategy_id.insert(strategy_id.to_string(), strategies.len());
        }

        strategies.push(ChangeRequestStrategy {
            project_id: event.project.clone(),
            feature_name: event.feature.clone(),
            strategy_name: event.change.strategy_name().unwrap_or_default().to_string(),
            environment: event.environment.clone(),
            id: event.change.existing_strategy_id().map(ToString::to_string),
            change_requests: vec![change_request],
        });
    }

    strategies
}

#[derive(Default)]
struct UsageSets<'a> {
    features: HashSet<&'a str>,
    projects: HashSet<&'a str>,
}

/// Per-segment count of distinct features and projects.
///
/// Combines segments referenced by pending change requests (attributed to the
/// change request's project) with persisted strategy–segment links.
pub fn segment_usage_counts<'a, I>(
    events: I,
    persisted: &'a [PersistedSegmentUsage],
) -> HashMap<SegmentId, SegmentUsage>
where
    I: IntoIterator<Item = &'a PendingStrategyEvent>,
{
    let mut sets: HashMap<SegmentId, UsageSets<'a>> = HashMap::new();

    for event in events {
        if event.change.segments().is_empty() || !is_pending(event) {
            continue;
        }
        for segment_id in event.change.segments() {
            let usage = sets.entry(*segment_id).or_default();
            usage.features.insert(&event.feature);
            usage.projects.insert(&event.project);
        }
    }

    for link in persisted {
        let usage = sets.entry(link.segment_id).or_default();
        usage.features.insert(&link.feature_name);
        usage.projects.insert(&link.project_name);
    }

    sets.into_iter()
        .map(|(segment_id, usage)| {
            (
                segment_id,
                SegmentUsage {
                    used_in_features: usage.features.len(),
                    used_in_projects: usage.projects.len(),
                },
            )
        })
        .collect()
}
