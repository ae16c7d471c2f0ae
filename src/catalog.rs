use crate::error::{McdError, Result};

/// Channel ids in the order they are interleaved in every sample frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelCatalog {
    ids: Vec<u32>,
}

impl ChannelCatalog {
    pub fn new(ids: Vec<u32>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, channel: u32) -> bool {
        self.ids.contains(&channel)
    }

    /// Position of the first occurrence of `channel` within a frame.
    pub fn position(&self, channel: u32) -> Option<usize> {
        self.ids.iter().position(|&id| id == channel)
    }

    /// The catalog as `12,13,21,`, the way the channel list is reported.
    pub fn listing(&self) -> String {
        self.ids.iter().map(|id| format!("{id},")).collect()
    }
}

/// Frame positions selected for extraction, in output order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionRegistry {
    positions: Vec<usize>,
}

impl ExtractionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `channel` by its first position in the catalog. Returns the
    /// position, or `None` if the catalog doesn't have the channel, in which case
    /// nothing is registered. Registering a position twice keeps the first entry.
    pub fn register(&mut self, catalog: &ChannelCatalog, channel: u32) -> Option<usize> {
        let position = catalog.position(channel)?;
        self.insert(position);
        Some(position)
    }

    /// Registers every catalog position in catalog order.
    pub fn register_all(&mut self, catalog: &ChannelCatalog) {
        for position in 0..catalog.len() {
            self.insert(position);
        }
    }

    fn insert(&mut self, position: usize) {
        if !self.positions.contains(&position) {
            self.positions.push(position);
        }
    }

    /// Validates every requested channel against the catalog before registering
    /// any of them. An empty request selects all channels.
    pub fn for_request(catalog: &ChannelCatalog, channels: &[u32]) -> Result<Self> {
        if let Some(&missing) = channels.iter().find(|&&c| !catalog.contains(c)) {
            return Err(McdError::UnknownChannel {
                channel: missing,
                available: catalog.ids().to_vec(),
            });
        }
        let mut registry = Self::new();
        if channels.is_empty() {
            registry.register_all(catalog);
        } else {
            for &channel in channels {
                registry.register(catalog, channel);
            }
        }
        Ok(registry)
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
