//! Priority adjustment passes.

use crate::network::QualityTier;
use crate::types::{Method, Priority, RequestDescriptor};

/// Inputs of the adjustment passes, sampled once per prioritization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityContext {
    pub battery_low: bool,
    pub quality: QualityTier,
}

/// Resolve the scheduling priority of one descriptor.
///
/// Battery pass first: a low battery demotes normal-priority `GET`s to
/// low. Network pass second: below excellent quality, `POST`/`PUT` are
/// raised to at least high and reads with no explicit priority become normal.
pub fn adjust_priority(descriptor: &RequestDescriptor, ctx: PriorityContext) -> Priority {
    let mut priority = descriptor.priority;

    if ctx.battery_low
        && descriptor.method == Method::Get
        && priority.unwrap_or_default() == Priority::Normal
    {
        priority = Some(Priority::Low);
    }

    if !ctx.quality.is_excellent() {
        if descriptor.method.is_write() {
            priority = Some(priority.unwrap_or_default().max(Priority::High));
        } else if descriptor.method.is_read() && priority.is_none() {
            priority = Some(Priority::Normal);
        }
    }

    priority.unwrap_or_default()
}

/// Apply [`adjust_priority`] to every descriptor, then stable-sort by
/// descending rank.
pub fn prioritize(mut descriptors: Vec<RequestDescriptor>, ctx: PriorityContext) -> Vec<RequestDescriptor> {
    for d in descriptors.iter_mut() {
        d.priority = Some(adjust_priority(d, ctx));
    }
    descriptors.sort_by(|a, b| b.effective_priority().cmp(&a.effective_priority()));
    descriptors
}
