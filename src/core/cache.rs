//! Decoded texture cache.
//!
//! Decoding texture blobs into displayable images is left to a
//! [`TextureDecoder`]; this cache only remembers the results, keyed by the
//! texture content hash so identical blobs are decoded once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Texture;
use crate::util::Result;

/// Turns an encoded texture blob into an image.
pub trait TextureDecoder {
    type Image;

    fn decode(&self, texture: &Texture) -> Result<Self::Image>;

    /// Approximate in-memory size of a decoded image, used for the capacity budget.
    fn image_size(&self, image: &Self::Image) -> usize;
}

/// Key for cache entries: content hash plus size for collision detection.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Debug)]
pub struct TextureKey {
    pub hash: u32,
    pub size: usize,
}

impl TextureKey {
    pub fn of(texture: &Texture) -> Self {
        Self {
            hash: texture.hash,
            size: texture.size(),
        }
    }
}

struct CachedImage<T> {
    image: Arc<T>,
    size: usize,
}

/// Capacity-bounded cache of decoded images.
///
/// When an insert would exceed the capacity the whole cache is flushed
/// first. Not thread-safe; hold one per rendering or export collaborator.
pub struct TextureCache<T> {
    entries: HashMap<TextureKey, CachedImage<T>>,
    capacity: usize,
    size: usize,
}

impl<T> TextureCache<T> {
    /// Default capacity (64 MB).
    pub const DEFAULT_CAPACITY: usize = 64 * 1024 * 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            size: 0,
        }
    }

    pub fn get(&self, texture: &Texture) -> Option<Arc<T>> {
        self.entries.get(&TextureKey::of(texture)).map(|e| Arc::clone(&e.image))
    }

    /// Cached image for `texture`, decoding and caching it on a miss.
    ///
    /// Images larger than the whole capacity are returned without being cached.
    pub fn get_or_decode<D>(&mut self, texture: &Texture, decoder: &D) -> Result<Arc<T>>
    where
        D: TextureDecoder<Image = T>,
    {
        let key = TextureKey::of(texture);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(Arc::clone(&entry.image));
        }

        let image = decoder.decode(texture)?;
        let size = decoder.image_size(&image);
        let image = Arc::new(image);
        if size > self.capacity {
            tracing::debug!(hash = texture.hash, size, capacity = self.capacity, "texture too large to cache");
            return Ok(image);
        }
        if self.size + size > self.capacity {
            self.flush();
        }
        self.entries.insert(
            key,
            CachedImage {
                image: Arc::clone(&image),
                size,
            },
        );
        self.size += size;
        Ok(image)
    }

    /// Forget the image decoded for `texture`, e.g. after its blob was replaced.
    pub fn remove(&mut self, texture: &Texture) -> Option<Arc<T>> {
        let entry = self.entries.remove(&TextureKey::of(texture))?;
        self.size -= entry.size;
        Some(entry.image)
    }

    /// Drop every cached image.
    pub fn flush(&mut self) {
        if !self.entries.is_empty() {
            tracing::trace!(entries = self.entries.len(), bytes = self.size, "texture cache flushed");
        }
        self.entries.clear();
        self.size = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes held, as reported by the decoder.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for TextureCache<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
