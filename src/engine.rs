//! The volume engine: the public `put`/`get` surface over cutouts,
//! resolving a cutout into the blocks it touches and routing each one
//! through its [`Block`].

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::array3d::{Array, ArrayElement};
use crate::block::BlockSettings;
use crate::block_index::BlockIndex;
use crate::error::{Error, Result};
use crate::geometry::{self, Coord3};
use crate::manifest::{Manifest, Scale};
use crate::storage::DataStore;

/// Settings that apply to every block the engine creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSettings {
    /// Whether newly created blocks are gzip-wrapped on the wire.
    pub gzip: bool,
}

/// The storage engine: a manifest, a data store, and one [`BlockIndex`] per
/// scale.
pub struct Engine {
    store: Arc<dyn DataStore>,
    manifest: Manifest,
    indices: HashMap<String, BlockIndex>,
    settings: EngineSettings,
}

impl Engine {
    /// Construct an engine over `manifest`, backed by `data_store`, with an
    /// empty [`BlockIndex`] for each scale.
    #[must_use]
    pub fn new(manifest: Manifest, data_store: Arc<dyn DataStore>, settings: EngineSettings) -> Self {
        let mut indices = HashMap::new();
        for scale in &manifest.scales {
            indices.insert(scale.key.clone(), BlockIndex::new());
        }
        Self {
            store: data_store,
            manifest,
            indices,
            settings,
        }
    }

    /// The engine's manifest.
    #[must_use]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn scale(&self, scale_key: &str) -> Result<&Scale> {
        self.manifest
            .scale(scale_key)
            .map_err(|_| Error::UnknownScale(scale_key.to_string()))
    }

    fn resolved_chunk_shape(&self, scale: &Scale) -> Result<[u64; 3]> {
        if scale.chunk_sizes.len() > 1 && crate::config::global_config().warn_on_multiple_chunk_sizes()
        {
            warn!(
                "scale {:?} declares {} chunk_sizes; using the first, {:?}",
                scale.key,
                scale.chunk_sizes.len(),
                scale.chunk_sizes[0]
            );
        }
        Ok(scale.selected_chunk_shape()?)
    }

    fn compose_cutout(
        &self,
        scale: &Scale,
        xrng: (i64, i64),
        yrng: (i64, i64),
        zrng: (i64, i64),
        subtract_voxel_offset: bool,
    ) -> (Coord3, Coord3) {
        let mut start: Coord3 = [xrng.0, yrng.0, zrng.0];
        let mut end: Coord3 = [xrng.1, yrng.1, zrng.1];
        if subtract_voxel_offset {
            for i in 0..3 {
                start[i] -= scale.voxel_offset[i];
                end[i] -= scale.voxel_offset[i];
            }
        }
        (start, end)
    }

    /// Write `data` into the cutout `[xrng, yrng, zrng)` of `scale_key`,
    /// creating blocks as needed. Accumulative: overlapping prior content is
    /// incremented, not replaced.
    ///
    /// # Errors
    /// Returns [`Error::UnknownScale`] if `scale_key` is not in the
    /// manifest, a geometry error on an invalid range, or a block-level
    /// error propagated from encode/store failures.
    pub fn put<T: ArrayElement>(
        &mut self,
        data: &mut Array<T>,
        xrng: (i64, i64),
        yrng: (i64, i64),
        zrng: (i64, i64),
        scale_key: &str,
        subtract_voxel_offset: bool,
    ) -> Result<()> {
        let scale = self.scale(scale_key)?.clone();
        let chunk_shape = self.resolved_chunk_shape(&scale)?;
        let (cutout_start, cutout_end) =
            self.compose_cutout(&scale, xrng, yrng, zrng, subtract_voxel_offset);
        let image_size: Coord3 = std::array::from_fn(|i| scale.size[i] as i64);

        let block_keys = geometry::blocks_for_bbox(chunk_shape, cutout_start, cutout_end)?;
        let index = self
            .indices
            .get_mut(scale_key)
            .ok_or_else(|| Error::UnknownScale(scale_key.to_string()))?;

        for key in block_keys {
            let block_start = geometry::block_start(key, chunk_shape);
            let block_end = geometry::block_end(key, chunk_shape, Some(image_size));
            let block_size = geometry::block_size_from_extents(block_start, block_end);
            let (restricted_start, restricted_end) =
                geometry::data_view(block_start, block_end, cutout_start, cutout_end);

            let input_start: [u64; 3] =
                std::array::from_fn(|i| (restricted_start[i] - cutout_start[i]) as u64);
            let input_end: [u64; 3] =
                std::array::from_fn(|i| (restricted_end[i] - cutout_start[i]) as u64);
            let block_offset: [u64; 3] =
                std::array::from_fn(|i| (restricted_start[i] - block_start[i]) as u64);

            let view = data.view(
                (input_start[0], input_end[0]),
                (input_start[1], input_end[1]),
                (input_start[2], input_end[2]),
            )?;

            if !index.contains(key) {
                let name = self.store.block_name(
                    block_start[0],
                    block_end[0],
                    block_start[1],
                    block_end[1],
                    block_start[2],
                    block_end[2],
                    scale.voxel_offset,
                );
                let settings = BlockSettings {
                    gzip: self.settings.gzip,
                };
                let block = self.store.create_block(
                    Arc::clone(&self.store),
                    &name,
                    scale_key,
                    block_size,
                    self.manifest.data_type,
                    scale.encoding,
                    settings,
                )?;
                index.insert(key, block);
            }
            let block = index.find(key).expect("just inserted or already present");
            block.add(&view, block_offset, false)?;
        }
        Ok(())
    }

    /// Read the cutout `[xrng, yrng, zrng)` of `scale_key` into `data`.
    /// Accumulative: callers wanting pure replacement semantics must zero
    /// `data` first. Blocks with no backing store entry are treated as
    /// logically zero and contribute nothing.
    ///
    /// # Errors
    /// Returns [`Error::UnknownScale`] if `scale_key` is not in the
    /// manifest, a geometry error on an invalid range, or a block-level
    /// error propagated from decode/store failures.
    pub fn get<T: ArrayElement>(
        &mut self,
        data: &mut Array<T>,
        xrng: (i64, i64),
        yrng: (i64, i64),
        zrng: (i64, i64),
        scale_key: &str,
        subtract_voxel_offset: bool,
    ) -> Result<()> {
        let scale = self.scale(scale_key)?.clone();
        let chunk_shape = self.resolved_chunk_shape(&scale)?;
        let (cutout_start, cutout_end) =
            self.compose_cutout(&scale, xrng, yrng, zrng, subtract_voxel_offset);
        let image_size: Coord3 = std::array::from_fn(|i| scale.size[i] as i64);

        let block_keys = geometry::blocks_for_bbox(chunk_shape, cutout_start, cutout_end)?;
        let index = self
            .indices
            .get_mut(scale_key)
            .ok_or_else(|| Error::UnknownScale(scale_key.to_string()))?;

        for key in block_keys {
            let block_start = geometry::block_start(key, chunk_shape);
            let block_end = geometry::block_end(key, chunk_shape, Some(image_size));
            let block_size = geometry::block_size_from_extents(block_start, block_end);
            let (restricted_start, restricted_end) =
                geometry::data_view(block_start, block_end, cutout_start, cutout_end);

            let input_start: [u64; 3] =
                std::array::from_fn(|i| (restricted_start[i] - cutout_start[i]) as u64);
            let input_end: [u64; 3] =
                std::array::from_fn(|i| (restricted_end[i] - cutout_start[i]) as u64);
            let block_offset: [u64; 3] =
                std::array::from_fn(|i| (restricted_start[i] - block_start[i]) as u64);

            if !index.contains(key) {
                let name = self.store.block_name(
                    block_start[0],
                    block_end[0],
                    block_start[1],
                    block_end[1],
                    block_start[2],
                    block_end[2],
                    scale.voxel_offset,
                );
                let settings = BlockSettings {
                    gzip: self.settings.gzip,
                };
                let fetched = self.store.get_block(
                    Arc::clone(&self.store),
                    &name,
                    scale_key,
                    block_size,
                    self.manifest.data_type,
                    scale.encoding,
                    settings,
                )?;
                match fetched {
                    Some(block) => index.insert(key, block),
                    None => continue,
                }
            }
            let block = index.find(key).expect("just inserted or already present");
            let mut view = data.view(
                (input_start[0], input_end[0]),
                (input_start[1], input_end[1]),
                (input_start[2], input_end[2]),
            )?;
            block.get(&mut view, block_offset)?;
        }
        Ok(())
    }

    /// Flush every resident, dirty block across every scale, propagating
    /// the first failure encountered rather than silently dropping it.
    ///
    /// # Errors
    /// Returns the first [`Error::Block`] encountered while saving.
    pub fn flush(&mut self) -> Result<()> {
        for index in self.indices.values_mut() {
            for (_, block) in index.iter_mut() {
                block.flush()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{DataType, Encoding, VolumeType};
    use crate::storage::MemoryStore;

    fn manifest_one_scale(chunk: [u64; 3], size: [u64; 3], voxel_offset: [i64; 3]) -> Manifest {
        Manifest {
            volume_type: VolumeType::Image,
            data_type: DataType::U32,
            num_channels: 1,
            scales: vec![Scale {
                key: "0".to_string(),
                size,
                voxel_offset,
                resolution: [4.0, 4.0, 40.0],
                chunk_sizes: vec![chunk],
                encoding: Encoding::Raw,
                compressed_segmentation_block_size: None,
            }],
            mesh: None,
        }
    }

    fn filled_array(xdim: u64, ydim: u64, zdim: u64, f: impl Fn(u64, u64, u64) -> u32) -> Array<u32> {
        let mut a = Array::new(xdim, ydim, zdim);
        for x in 0..xdim {
            for y in 0..ydim {
                for z in 0..zdim {
                    a.set(x, y, z, f(x, y, z));
                }
            }
        }
        a
    }

    #[test]
    fn aligned_put_then_get_round_trips() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut input = filled_array(4, 4, 4, |x, y, z| (x * 16 + y * 4 + z) as u32);
        engine
            .put(&mut input, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();

        let mut output = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut output, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn aligned_put_with_voxel_offset_subtraction() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [100, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut input = filled_array(4, 4, 4, |x, _, _| x as u32 + 1);
        engine
            .put(&mut input, (100, 104), (0, 4), (0, 4), "0", true)
            .unwrap();

        let mut output = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut output, (100, 104), (0, 4), (0, 4), "0", true)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn thin_slab_cutout() {
        let manifest = manifest_one_scale([8, 8, 8], [16, 16, 16], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut input = filled_array(16, 16, 1, |x, y, _| (x + y) as u32);
        engine
            .put(&mut input, (0, 16), (0, 16), (5, 6), "0", false)
            .unwrap();

        let mut output = Array::<u32>::new(16, 16, 1);
        engine
            .get(&mut output, (0, 16), (0, 16), (5, 6), "0", false)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn unaligned_interior_cutout_spans_multiple_blocks() {
        let manifest = manifest_one_scale([4, 4, 4], [16, 16, 16], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut input = filled_array(6, 6, 6, |x, y, z| (x * 36 + y * 6 + z) as u32 + 1);
        engine
            .put(&mut input, (1, 7), (1, 7), (1, 7), "0", false)
            .unwrap();

        let mut output = Array::<u32>::new(6, 6, 6);
        engine
            .get(&mut output, (1, 7), (1, 7), (1, 7), "0", false)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn unaligned_edge_clipped_cutout() {
        let manifest = manifest_one_scale([4, 4, 4], [10, 10, 10], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut input = filled_array(4, 4, 4, |x, y, z| (x + y + z) as u32 + 1);
        engine
            .put(&mut input, (6, 10), (6, 10), (6, 10), "0", false)
            .unwrap();

        let mut output = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut output, (6, 10), (6, 10), (6, 10), "0", false)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn two_puts_then_two_gets_are_accumulative() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut ones = filled_array(4, 4, 4, |_, _, _| 1);
        engine
            .put(&mut ones.clone(), (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        engine
            .put(&mut ones, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();

        let mut first_get = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut first_get, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        assert!(first_get.as_slice().iter().all(|&v| v == 2));

        let mut second_get = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut second_get, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        assert!(second_get.as_slice().iter().all(|&v| v == 4));
    }

    #[test]
    fn aligned_put_with_gzip_enabled() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings { gzip: true });

        let mut input = filled_array(4, 4, 4, |x, y, z| (x * 16 + y * 4 + z) as u32);
        engine
            .put(&mut input, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        engine.flush().unwrap();

        let mut output = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut output, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        assert_eq!(output.as_slice(), input.as_slice());
    }

    #[test]
    fn get_of_never_written_scale_region_is_zero() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());

        let mut output = Array::<u32>::new(4, 4, 4);
        engine
            .get(&mut output, (0, 4), (0, 4), (0, 4), "0", false)
            .unwrap();
        assert!(output.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn unknown_scale_is_rejected() {
        let manifest = manifest_one_scale([4, 4, 4], [8, 8, 8], [0, 0, 0]);
        let store: Arc<dyn DataStore> = Arc::new(MemoryStore::new());
        let mut engine = Engine::new(manifest, store, EngineSettings::default());
        let mut output = Array::<u32>::new(4, 4, 4);
        let err = engine
            .get(&mut output, (0, 4), (0, 4), (0, 4), "missing", false)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownScale(_)));
    }
}
