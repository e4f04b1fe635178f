//! Tracked images: viewport-distance degradation under memory pressure and threshold-based
//! lazy loading.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 1×1 transparent GIF.
pub const PLACEHOLDER_SRC: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Images further than this many viewport heights from the viewport centre are degraded.
pub const DEGRADE_DISTANCE_VIEWPORTS: f64 = 2.0;

pub type ImageId = u64;

/// Vertical extent relative to the top of the viewport, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub top: f64,
    pub bottom: f64,
}

impl BoundingBox {
    #[must_use]
    pub fn new(top: f64, bottom: f64) -> Self {
        Self { top, bottom }
    }

    #[must_use]
    pub fn center(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { height: 900.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedImage {
    pub src: String,
    /// Set while degraded.
    pub original_src: Option<String>,
    /// Set until the lazy image first intersects.
    pub lazy_src: Option<String>,
    pub rect: BoundingBox,
}

impl TrackedImage {
    pub fn is_degraded(&self) -> bool {
        self.original_src.is_some()
    }

    pub fn is_loaded(&self) -> bool {
        self.lazy_src.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DegradeReport {
    pub degraded: usize,
    pub restored: usize,
}

#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: RwLock<HashMap<ImageId, TrackedImage>>,
    viewport: RwLock<Viewport>,
    next_id: AtomicU64,
}

impl ImageRegistry {
    pub fn new(viewport: Viewport) -> Self {
        Self { viewport: RwLock::new(viewport), ..Default::default() }
    }

    fn insert(&self, image: TrackedImage) -> ImageId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.images.write().insert(id, image);
        id
    }

    pub fn register(&self, src: &str, rect: BoundingBox) -> ImageId {
        self.insert(TrackedImage { src: src.to_string(), original_src: None, lazy_src: None, rect })
    }

    /// Registers an image whose real source loads once it intersects the viewport.
    pub fn register_lazy(&self, data_src: &str, rect: BoundingBox) -> ImageId {
        self.insert(TrackedImage {
            src: String::new(),
            original_src: None,
            lazy_src: Some(data_src.to_string()),
            rect,
        })
    }

    pub fn unregister(&self, id: ImageId) -> Option<TrackedImage> {
        self.images.write().remove(&id)
    }

    pub fn update_rect(&self, id: ImageId, rect: BoundingBox) -> bool {
        match self.images.write().get_mut(&id) {
            Some(img) => {
                img.rect = rect;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: ImageId) -> Option<TrackedImage> {
        self.images.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.images.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.read().is_empty()
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.read()
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.write() = viewport;
    }

    /// Swaps far-away images to the placeholder and restores those back in range.
    /// Running it twice in a row changes nothing the second time.
    pub fn degrade_offscreen(&self) -> DegradeReport {
        let vh = self.viewport().height;
        let mut report = DegradeReport::default();
        if vh <= 0.0 {
            return report;
        }
        let limit = DEGRADE_DISTANCE_VIEWPORTS * vh;
        let mut images = self.images.write();
        for img in images.values_mut() {
            let far = (img.rect.center() - vh / 2.0).abs() > limit;
            if far {
                if img.original_src.is_none() && !img.src.is_empty() && img.src != PLACEHOLDER_SRC {
                    img.original_src = Some(std::mem::replace(&mut img.src, PLACEHOLDER_SRC.to_string()));
                    report.degraded += 1;
                }
            } else if let Some(original) = img.original_src.take() {
                img.src = original;
                report.restored += 1;
            }
        }
        report
    }

    /// Puts every degraded image back to its original source.
    pub fn restore_all(&self) -> usize {
        let mut restored = 0;
        for img in self.images.write().values_mut() {
            if let Some(original) = img.original_src.take() {
                img.src = original;
                restored += 1;
            }
        }
        restored
    }

    /// Reports an intersection ratio for `id`. Loads a pending lazy image once `ratio`
    /// reaches `threshold`; returns whether it loaded now.
    pub fn observe_intersection(&self, id: ImageId, ratio: f64, threshold: f64) -> bool {
        let mut images = self.images.write();
        let Some(img) = images.get_mut(&id) else { return false };
        if ratio < threshold || ratio <= 0.0 {
            return false;
        }
        match img.lazy_src.take() {
            Some(src) => {
                img.src = src;
                log::debug!("lazy image {id} loaded at ratio {ratio:.2}");
                true
            }
            None => false,
        }
    }
}
