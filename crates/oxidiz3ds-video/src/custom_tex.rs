//! Custom texture replacement.
//!
//! The cache hashes every texture it uploads and asks a [`CustomTextureManager`]
//! for a replacement [`Material`]. Materials decode either on the spot or on a
//! worker thread; in the latter case the cache keeps the upload pending and
//! retries from `tick_frame` once [`Material::is_decoded`] reports ready.

use crate::codec;
use crate::params::SurfaceParams;
use crate::pixel_format::{PixelFormat, SurfaceType};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Number of finished custom uploads applied per frame
pub const MAX_UPLOADS_PER_TICK: usize = 8;

/// Hash used to look up replacements for a texture's contents.
pub fn compute_hash(data: &[u8]) -> u64 {
    xxh3_64(data)
}

/// Host formats a replacement texture can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomPixelFormat {
    Rgba8,
    Bc1,
    Bc3,
    Bc5,
    Bc7,
    Astc4,
    Astc6,
    Astc8,
}

impl CustomPixelFormat {
    /// Encoded size of a `width` x `height` image.
    pub const fn encoded_size(self, width: u32, height: u32) -> usize {
        let (block, block_bytes) = match self {
            CustomPixelFormat::Rgba8 => return (width * height * 4) as usize,
            CustomPixelFormat::Bc1 => (4, 8),
            CustomPixelFormat::Bc3 | CustomPixelFormat::Bc5 | CustomPixelFormat::Bc7 => (4, 16),
            CustomPixelFormat::Astc4 => (4, 16),
            CustomPixelFormat::Astc6 => (6, 16),
            CustomPixelFormat::Astc8 => (8, 16),
        };
        (width.div_ceil(block) * height.div_ceil(block) * block_bytes) as usize
    }
}

impl fmt::Display for CustomPixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Unloaded,
    Pending,
    Decoded,
    Failed,
}

#[derive(Debug)]
struct MaterialData {
    state: DecodeState,
    data: Vec<u8>,
}

/// A replacement texture for one content hash.
#[derive(Debug)]
pub struct Material {
    pub hash: u64,
    pub width: u32,
    pub height: u32,
    pub format: CustomPixelFormat,
    encoded: Vec<u8>,
    inner: Mutex<MaterialData>,
}

impl Material {
    /// `encoded` holds RGBA8 rows top row first, or raw blocks for compressed formats.
    pub fn new(hash: u64, width: u32, height: u32, format: CustomPixelFormat, encoded: Vec<u8>) -> Self {
        Self {
            hash,
            width,
            height,
            format,
            encoded,
            inner: Mutex::new(MaterialData {
                state: DecodeState::Unloaded,
                data: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> DecodeState {
        self.inner.lock().state
    }

    pub fn is_decoded(&self) -> bool {
        self.state() == DecodeState::Decoded
    }

    /// Runs `f` on the decoded texels (bottom row first), if decoding finished.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let inner = self.inner.lock();
        (inner.state == DecodeState::Decoded).then(|| f(&inner.data))
    }

    /// Moves an unloaded material to pending. Returns false if it was already requested.
    fn request(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != DecodeState::Unloaded {
            return false;
        }
        inner.state = DecodeState::Pending;
        true
    }

    /// Decodes the material in place.
    fn load(&self) {
        if self.encoded.len() != self.format.encoded_size(self.width, self.height) {
            warn!(
                "Custom texture {:016X} has {} bytes, expected {}",
                self.hash,
                self.encoded.len(),
                self.format.encoded_size(self.width, self.height)
            );
            self.inner.lock().state = DecodeState::Failed;
            return;
        }

        let data = match self.format {
            CustomPixelFormat::Rgba8 => {
                let row = self.width as usize * 4;
                self.encoded.chunks_exact(row).rev().flatten().copied().collect()
            }
            _ => self.encoded.clone(),
        };

        let mut inner = self.inner.lock();
        inner.data = data;
        inner.state = DecodeState::Decoded;
    }
}

pub trait CustomTextureManager {
    /// Replacement registered for `hash`, if any.
    fn get_material(&mut self, hash: u64) -> Option<Arc<Material>>;

    /// Starts decoding `material`. Returns true when its data can be uploaded now.
    fn decode(&mut self, material: &Arc<Material>) -> bool;

    /// Records the guest texture `data` of one surface level.
    fn dump_texture(&mut self, params: &SurfaceParams, level: u32, data: &[u8], hash: u64);

    /// Whether replacements only provide the base level.
    fn skip_mipmaps(&self) -> bool;

    /// Whether hashes are taken over the raw guest bytes rather than decoded texels.
    fn use_new_hash(&self) -> bool;

    fn tick_frame(&mut self);

    /// Finished asynchronous uploads the cache may apply per frame.
    fn upload_budget(&self) -> usize {
        usize::MAX
    }
}

/// Manager used when replacement is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCustomTextures;

impl CustomTextureManager for NoCustomTextures {
    fn get_material(&mut self, _hash: u64) -> Option<Arc<Material>> {
        None
    }

    fn decode(&mut self, _material: &Arc<Material>) -> bool {
        false
    }

    fn dump_texture(&mut self, _params: &SurfaceParams, _level: u32, _data: &[u8], _hash: u64) {}

    fn skip_mipmaps(&self) -> bool {
        false
    }

    fn use_new_hash(&self) -> bool {
        true
    }

    fn tick_frame(&mut self) {}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("texture {hash:016X} has {actual} bytes, expected {expected} for {width}x{height} {format}")]
    SizeMismatch {
        hash: u64,
        width: u32,
        height: u32,
        format: CustomPixelFormat,
        actual: usize,
        expected: usize,
    },
    #[error("texture {0:016X} has a zero dimension")]
    Empty(u64),
    #[error("duplicate replacement for hash {0:016X}")]
    Duplicate(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexturePackOptions {
    /// Decode on a worker thread and upload from `tick_frame`
    pub async_loading: bool,
    pub skip_mipmaps: bool,
    pub use_new_hash: bool,
}

impl Default for TexturePackOptions {
    fn default() -> Self {
        Self {
            async_loading: false,
            skip_mipmaps: false,
            use_new_hash: true,
        }
    }
}

/// One texture captured by [`CustomTextureManager::dump_texture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRecord {
    pub hash: u64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub level: u32,
    /// RGBA8 texels, top row first
    pub rgba: Vec<u8>,
}

impl DumpRecord {
    /// File name a dump of this texture would be written to.
    pub fn file_name(&self) -> String {
        format!(
            "tex1_{}x{}_{:016X}_{}_mip{}.png",
            self.width, self.height, self.hash, self.format, self.level
        )
    }
}

struct Worker {
    jobs: Option<Sender<Arc<Material>>>,
    done: Receiver<u64>,
    handle: Option<JoinHandle<()>>,
    in_flight: usize,
}

impl Worker {
    fn spawn() -> Self {
        let (jobs, job_rx) = unbounded::<Arc<Material>>();
        let (done_tx, done) = unbounded();
        let handle = std::thread::Builder::new()
            .name("custom-textures".into())
            .spawn(move || {
                for material in job_rx {
                    material.load();
                    trace!("Decoded custom texture {:016X}", material.hash);
                    if done_tx.send(material.hash).is_err() {
                        break;
                    }
                }
            })
            .ok();
        if handle.is_none() {
            warn!("Failed to spawn custom texture worker, decoding inline");
        }
        Self {
            jobs: Some(jobs),
            done,
            handle,
            in_flight: 0,
        }
    }

    fn queue(&mut self, material: Arc<Material>) {
        if self.handle.is_none() {
            material.load();
            return;
        }
        if let Some(jobs) = &self.jobs
            && jobs.send(material).is_ok()
        {
            self.in_flight += 1;
        }
    }

    fn drain(&mut self, block: bool) -> usize {
        let mut finished = 0;
        while self.in_flight > 0 {
            let result = if block {
                self.done.recv().ok()
            } else {
                self.done.try_recv().ok()
            };
            let Some(hash) = result else {
                break;
            };
            debug!("Custom texture {:016X} ready", hash);
            self.in_flight -= 1;
            finished += 1;
        }
        finished
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// In-memory texture pack keyed by content hash.
pub struct TexturePack {
    materials: HashMap<u64, Arc<Material>>,
    options: TexturePackOptions,
    worker: Option<Worker>,
    dumped: HashSet<u64>,
    dumps: Vec<DumpRecord>,
}

impl TexturePack {
    pub fn new(options: TexturePackOptions) -> Self {
        info!(
            "Custom texture pack: async={} skip_mipmaps={} new_hash={}",
            options.async_loading, options.skip_mipmaps, options.use_new_hash
        );
        Self {
            materials: HashMap::new(),
            options,
            worker: None,
            dumped: HashSet::new(),
            dumps: Vec::new(),
        }
    }

    /// Registers a replacement for `hash`.
    pub fn insert(
        &mut self,
        hash: u64,
        width: u32,
        height: u32,
        format: CustomPixelFormat,
        encoded: Vec<u8>,
    ) -> Result<Arc<Material>, PackError> {
        if width == 0 || height == 0 {
            return Err(PackError::Empty(hash));
        }
        let expected = format.encoded_size(width, height);
        if encoded.len() != expected {
            return Err(PackError::SizeMismatch {
                hash,
                width,
                height,
                format,
                actual: encoded.len(),
                expected,
            });
        }
        if self.materials.contains_key(&hash) {
            return Err(PackError::Duplicate(hash));
        }

        let material = Arc::new(Material::new(hash, width, height, format, encoded));
        self.materials.insert(hash, Arc::clone(&material));
        Ok(material)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Textures captured so far, in dump order.
    pub fn dumps(&self) -> &[DumpRecord] {
        &self.dumps
    }

    /// Blocks until every queued decode has finished.
    pub fn wait_idle(&mut self) {
        if let Some(worker) = &mut self.worker {
            worker.drain(true);
        }
    }
}

fn is_pow2(value: u32) -> bool {
    value != 0 && value & (value - 1) == 0
}

impl CustomTextureManager for TexturePack {
    fn get_material(&mut self, hash: u64) -> Option<Arc<Material>> {
        let material = self.materials.get(&hash).cloned();
        if material.is_none() {
            debug!("No replacement for surface with hash {:016X}", hash);
        }
        material
    }

    fn decode(&mut self, material: &Arc<Material>) -> bool {
        if !self.options.async_loading {
            if material.request() {
                material.load();
            }
            return material.is_decoded();
        }

        if material.request() {
            self.worker.get_or_insert_with(Worker::spawn).queue(Arc::clone(material));
        }
        false
    }

    fn dump_texture(&mut self, params: &SurfaceParams, level: u32, data: &[u8], hash: u64) {
        if self.dumped.contains(&hash) {
            return;
        }
        if !is_pow2(params.width) || !is_pow2(params.height) {
            warn!(
                "Not dumping {:016X} because size isn't a power of 2 ({}x{})",
                hash, params.width, params.height
            );
            return;
        }

        let converted = params.surface_type == SurfaceType::Color;
        if !codec::host_is_rgba(params.pixel_format, converted) {
            warn!("Not dumping {:016X}: {} has no color representation", hash, params.pixel_format);
            return;
        }

        let (width, height) = (params.width as usize, params.height as usize);
        let mut decoded = vec![0u8; width * height * 4];
        codec::decode_texture(params, params.addr, params.end, data, &mut decoded, converted);
        let rgba = decoded.chunks_exact(width * 4).rev().flatten().copied().collect();

        let record = DumpRecord {
            hash,
            width: params.width,
            height: params.height,
            format: params.pixel_format,
            level,
            rgba,
        };
        debug!("Dumped {}", record.file_name());
        self.dumped.insert(hash);
        self.dumps.push(record);
    }

    fn skip_mipmaps(&self) -> bool {
        self.options.skip_mipmaps
    }

    fn use_new_hash(&self) -> bool {
        self.options.use_new_hash
    }

    fn tick_frame(&mut self) {
        if let Some(worker) = &mut self.worker {
            let finished = worker.drain(false);
            if finished > 0 {
                trace!("{} custom textures finished decoding", finished);
            }
        }
    }

    fn upload_budget(&self) -> usize {
        MAX_UPLOADS_PER_TICK
    }
}
