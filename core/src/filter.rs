//! Filter trait for virta plugins

use crate::error::PluginError;
use crate::event::Event;

/// Filter trait - inspects, transforms or discards one event
///
/// Filters run synchronously on the delivering input's task, so a slow filter
/// only slows down that input.
///
/// - Return `Ok(Some(event))` to pass the event on (unchanged or rebuilt)
/// - Return `Ok(None)` to discard it
/// - Return `Err(_)` when the filter itself broke; the pipeline drops the
///   event and reports a problem naming the filter
///
/// Filters may keep internal state (counters, caches) behind their own
/// synchronization, but never mutate anything another sink can observe:
/// they only ever see their own copy of the event.
pub trait Filter: Send + Sync {
    /// Filter name, used for health attribution
    fn name(&self) -> &str;

    /// Apply the filter to one event
    fn apply(&self, event: Event) -> Result<Option<Event>, PluginError>;
}
