//! Memory-aware resource preloading.
//!
//! Preloads pause above `pause_percent` heap usage (requests are queued, never dropped) and
//! the queue only drains again once usage falls below `resume_percent`.

use crate::errors::PreloadError;
use crate::probe::SharedProbe;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Image,
    Video,
    Audio,
    Script,
    Style,
    Fetch,
}

impl ResourceType {
    /// Infers the type from the URL's file extension; anything unknown is `Fetch`.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file = path.rsplit('/').next().unwrap_or(path);
        let ext = match file.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return Self::Fetch,
        };
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "avif" | "svg" => Self::Image,
            "mp4" | "webm" | "mov" | "m4v" => Self::Video,
            "mp3" | "wav" | "ogg" | "m4a" | "aac" | "flac" => Self::Audio,
            "js" | "mjs" => Self::Script,
            "css" => Self::Style,
            _ => Self::Fetch,
        }
    }

    /// Value of the hint's `as` attribute.
    pub fn as_attr(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Script => "script",
            Self::Style => "style",
            Self::Fetch => "fetch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreloadRequest {
    pub url: String,
    pub resource_type: ResourceType,
}

/// Performs the actual early fetch for a hint.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, request: &PreloadRequest) -> Result<(), PreloadError>;
}

/// Fetcher that accepts every request without doing anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFetcher;

impl ResourceFetcher for NoopFetcher {
    fn fetch(&self, _request: &PreloadRequest) -> Result<(), PreloadError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadOutcome {
    /// Already preloaded earlier.
    Skipped,
    /// Heap usage too high; queued for later.
    Deferred,
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreloadConfig {
    pub pause_percent: f64,
    pub resume_percent: f64,
    pub batch_size: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self { pause_percent: 70.0, resume_percent: 60.0, batch_size: 5 }
    }
}

#[derive(Default)]
struct HintState {
    preloaded: HashSet<String>,
    /// Hints attached for fetches in flight.
    active: HashSet<String>,
}

/// Attached hint; detaches itself when dropped.
struct HintGuard<'a> {
    state: &'a Mutex<HintState>,
    url: &'a str,
}

impl<'a> HintGuard<'a> {
    /// Attaches a hint for `url` unless it is already preloaded or being fetched.
    fn claim(state: &'a Mutex<HintState>, url: &'a str) -> Option<Self> {
        let mut st = state.lock();
        if st.preloaded.contains(url) || !st.active.insert(url.to_string()) {
            return None;
        }
        Some(Self { state, url })
    }

    /// Detaches the hint, recording the URL as preloaded in the same step.
    fn complete(self) {
        let mut st = self.state.lock();
        st.active.remove(self.url);
        st.preloaded.insert(self.url.to_string());
        drop(st);
        std::mem::forget(self);
    }
}

impl Drop for HintGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().active.remove(self.url);
    }
}

pub struct MemoryAwarePreloader {
    probe: SharedProbe,
    fetcher: Arc<dyn ResourceFetcher>,
    config: PreloadConfig,
    hints: Mutex<HintState>,
    queue: Mutex<VecDeque<String>>,
}

impl MemoryAwarePreloader {
    pub fn new(probe: SharedProbe, fetcher: Arc<dyn ResourceFetcher>, config: PreloadConfig) -> Self {
        Self {
            probe,
            fetcher,
            config,
            hints: Mutex::new(HintState::default()),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Current heap usage; 0 when the probe is unsupported.
    fn usage_percent(&self) -> f64 {
        self.probe.sample().map(|u| u.percent()).unwrap_or(0.0)
    }

    /// A URL already queued stays queued until usage drops below the resume threshold;
    /// a new one is deferred only above the pause threshold.
    pub fn preload_resource(&self, url: &str, resource_type: ResourceType) -> Result<PreloadOutcome, PreloadError> {
        if self.is_preloaded(url) {
            return Ok(PreloadOutcome::Skipped);
        }
        let usage = self.usage_percent();
        {
            let mut queue = self.queue.lock();
            match queue.iter().position(|u| u == url) {
                Some(_) if usage >= self.config.resume_percent => {
                    log::debug!("heap at {usage:.1}%, {url} stays queued");
                    return Ok(PreloadOutcome::Deferred);
                }
                Some(pos) => {
                    queue.remove(pos);
                }
                None if usage > self.config.pause_percent => {
                    queue.push_back(url.to_string());
                    log::debug!("heap at {usage:.1}%, deferring preload of {url}");
                    return Ok(PreloadOutcome::Deferred);
                }
                None => {}
            }
        }
        self.issue(url, resource_type)
    }

    fn issue(&self, url: &str, resource_type: ResourceType) -> Result<PreloadOutcome, PreloadError> {
        let Some(hint) = HintGuard::claim(&self.hints, url) else {
            return Ok(PreloadOutcome::Skipped);
        };
        let request = PreloadRequest { url: url.to_string(), resource_type };
        match self.fetcher.fetch(&request) {
            Ok(()) => {
                hint.complete();
                crate::dev_event!("preload", "loaded", kind = format!("\"{}\"", resource_type.as_attr()));
                Ok(PreloadOutcome::Loaded)
            }
            Err(e) => {
                drop(hint);
                log::debug!("{e}");
                Err(e)
            }
        }
    }

    /// Issues up to `batch_size` queued preloads when usage is below the resume threshold.
    /// Returns the number issued; failures are logged and not re-queued.
    pub fn process_preload_queue(&self) -> usize {
        if self.queue.lock().is_empty() {
            return 0;
        }
        let usage = self.usage_percent();
        if usage >= self.config.resume_percent {
            return 0;
        }
        let batch: Vec<String> = {
            let mut queue = self.queue.lock();
            let n = self.config.batch_size.min(queue.len());
            queue.drain(..n).collect()
        };
        let mut issued = 0;
        for url in batch {
            match self.issue(&url, ResourceType::from_url(&url)) {
                Ok(PreloadOutcome::Skipped) => {}
                Ok(_) => issued += 1,
                Err(e) => {
                    issued += 1;
                    log::warn!("queued preload failed: {e}");
                }
            }
        }
        issued
    }

    pub fn is_preloaded(&self, url: &str) -> bool {
        self.hints.lock().preloaded.contains(url)
    }

    pub fn preloaded_count(&self) -> usize {
        self.hints.lock().preloaded.len()
    }

    pub fn queued(&self) -> Vec<String> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Hints currently attached; empty whenever no fetch is in flight.
    pub fn active_hints(&self) -> usize {
        self.hints.lock().active.len()
    }

    pub fn config(&self) -> PreloadConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_claim_is_exclusive_until_released() {
        let state = Mutex::new(HintState::default());
        let first = HintGuard::claim(&state, "/a.js").unwrap();
        assert!(HintGuard::claim(&state, "/a.js").is_none());
        drop(first);
        let again = HintGuard::claim(&state, "/a.js").unwrap();
        again.complete();
        assert!(state.lock().active.is_empty());
        assert!(HintGuard::claim(&state, "/a.js").is_none());
    }

    #[test]
    fn type_inference_from_extension() {
        assert_eq!(ResourceType::from_url("/posters/dune.JPG"), ResourceType::Image);
        assert_eq!(ResourceType::from_url("https://cdn.x/trailer.mp4?t=3"), ResourceType::Video);
        assert_eq!(ResourceType::from_url("/score.ogg#intro"), ResourceType::Audio);
        assert_eq!(ResourceType::from_url("/app.mjs"), ResourceType::Script);
        assert_eq!(ResourceType::from_url("/theme.css"), ResourceType::Style);
        assert_eq!(ResourceType::from_url("/api/projects"), ResourceType::Fetch);
        assert_eq!(ResourceType::from_url("https://example.com/v1.2/data"), ResourceType::Fetch);
    }
}
