//! Per-scale ordered index of loaded blocks.

use std::collections::BTreeMap;

use crate::block::Block;
use crate::geometry::BlockKey;

/// An ordered, owning map from [`BlockKey`] to [`Block`], iterating in
/// Morton order by construction (`BlockKey`'s `Ord` impl is Morton order).
#[derive(Default)]
pub struct BlockIndex {
    blocks: BTreeMap<BlockKey, Block>,
}

impl BlockIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a block by key.
    #[must_use]
    pub fn find(&mut self, key: BlockKey) -> Option<&mut Block> {
        self.blocks.get_mut(&key)
    }

    /// Insert a block, replacing and dropping (flushing) any block
    /// previously at this key.
    pub fn insert(&mut self, key: BlockKey, block: Block) {
        self.blocks.insert(key, block);
    }

    /// Whether the index currently holds a block for this key.
    #[must_use]
    pub fn contains(&self, key: BlockKey) -> bool {
        self.blocks.contains_key(&key)
    }

    /// Iterate over all blocks in Morton order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&BlockKey, &mut Block)> {
        self.blocks.iter_mut()
    }

    /// The number of resident blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the index holds no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DataType, Encoding};
    use crate::storage::{DataStore, MemoryStore};
    use std::sync::Arc;

    #[test]
    fn insert_and_find_round_trip() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut index = BlockIndex::new();
        let key = BlockKey::new(0, 0, 0);
        let block = Block::new(
            store,
            "0/0-4_0-4_0-4".to_string(),
            [4, 4, 4],
            DataType::U32,
            Encoding::Raw,
            crate::block::BlockSettings::default(),
        );
        index.insert(key, block);
        assert!(index.find(key).is_some());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn iteration_follows_morton_order() {
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut index = BlockIndex::new();
        let keys = [
            BlockKey::new(1, 0, 0),
            BlockKey::new(0, 1, 0),
            BlockKey::new(0, 0, 0),
        ];
        for key in keys {
            let block = Block::new(
                Arc::clone(&store),
                format!("0/{:?}", key.xyz()),
                [1, 1, 1],
                DataType::U8,
                Encoding::Raw,
                crate::block::BlockSettings::default(),
            );
            index.insert(key, block);
        }
        let mortons: Vec<_> = index.iter_mut().map(|(k, _)| k.morton()).collect();
        let mut sorted = mortons.clone();
        sorted.sort_unstable();
        assert_eq!(mortons, sorted);
    }
}
