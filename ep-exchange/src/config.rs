use std::collections::HashSet;
use std::time::Duration;

use crate::{Distributer, ExchangeError, NodeAddr};

/// How long a single dial to a peer may take before init gives up.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
/// The topology an exchange is initialised with.
pub struct ExchangeConfig {
    /// The distributer of this node, inbound data for the exchange arrives
    /// through it.
    pub distributer: Distributer,
    /// Every node taking part in the exchange, this node included.
    ///
    /// The order of the list is the order connections are opened in.
    pub all_nodes: Vec<NodeAddr>,
    /// The node gather exchanges send all of their data to.
    pub master_node: NodeAddr,
    /// The address of this node as it appears in `all_nodes`.
    pub this_node: NodeAddr,
    /// The maximum time to wait for a connection to a peer.
    pub dial_timeout: Duration,
}

impl ExchangeConfig {
    pub fn new<I, S>(
        distributer: Distributer,
        all_nodes: I,
        master_node: impl Into<NodeAddr>,
        this_node: impl Into<NodeAddr>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeAddr>,
    {
        Self {
            distributer,
            all_nodes: all_nodes.into_iter().map(Into::into).collect(),
            master_node: master_node.into(),
            this_node: this_node.into(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    /// Set a custom dial timeout.
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Returns `true` if this node is the only node of the exchange.
    pub fn is_single_node(&self) -> bool {
        self.all_nodes.len() == 1 && self.all_nodes[0] == self.this_node
    }

    pub(crate) fn master_index(&self) -> Option<usize> {
        self.all_nodes
            .iter()
            .position(|node| node == &self.master_node)
    }

    pub(crate) fn validate(&self) -> Result<(), ExchangeError> {
        if self.all_nodes.is_empty() {
            return Err(ExchangeError::InvalidConfig(
                "At least one node is required".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.all_nodes.len());
        if let Some(node) = self.all_nodes.iter().find(|node| !seen.insert(*node)) {
            return Err(ExchangeError::InvalidConfig(format!(
                "Node {node} is listed more than once"
            )));
        }

        if !self.all_nodes.contains(&self.this_node) {
            return Err(ExchangeError::InvalidConfig(format!(
                "This node {} is not one of the exchange's nodes",
                self.this_node
            )));
        }

        if self.master_index().is_none() {
            return Err(ExchangeError::InvalidConfig(format!(
                "Master node {} is not one of the exchange's nodes",
                self.master_node
            )));
        }

        if self.dial_timeout.is_zero() {
            return Err(ExchangeError::InvalidConfig(
                "The dial timeout must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
