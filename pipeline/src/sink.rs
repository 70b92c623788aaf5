//! Sink: one output plus its own filter chain

use crate::filter::FilterChain;
use std::sync::Arc;
use virta_core::{Filter, Output};

/// Binds exactly one [`Output`] to an optional sink-scoped filter chain
///
/// The name identifies the sink within a pipeline: it keys the sink's queue,
/// its sequence counter and its health reports.
#[derive(Clone)]
pub struct Sink {
    name: String,
    output: Arc<dyn Output>,
    filters: FilterChain,
}

impl Sink {
    /// Sink named `name` delivering to `output`
    pub fn new(name: impl Into<String>, output: Arc<dyn Output>) -> Self {
        Self {
            name: name.into(),
            output,
            filters: FilterChain::new(),
        }
    }

    /// Sink named after its output
    pub fn from_output(output: Arc<dyn Output>) -> Self {
        let name = output.name().to_string();
        Self::new(name, output)
    }

    /// Append a sink-scoped filter
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replace the sink-scoped chain
    pub fn with_filters(mut self, filters: FilterChain) -> Self {
        self.filters = filters;
        self
    }

    /// Sink name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output this sink delivers to
    pub fn output(&self) -> &Arc<dyn Output> {
        &self.output
    }

    /// Sink-scoped filters
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name)
            .field("output", &self.output.name())
            .field("filters", &self.filters)
            .finish()
    }
}
