//! Fallback engine
//!
//! Request-mutating recovery for failed transcode starts. Strategies are a
//! flat ordered list of (name, predicate, rewriter) entries, not a type
//! hierarchy: adding a strategy means adding a list element.

use std::future::Future;
use tracing::{info, warn};

use crate::models::{OutputContainer, TranscodeRequest};
use crate::provider::ProviderError;
use crate::{Error, Result};

/// One recovery strategy. `matches` inspects the failure message; `rewrite`
/// returns the mutated request, or None when the strategy has nothing left
/// to change (already at its floor).
pub struct FallbackStrategy {
    pub name: &'static str,
    pub matches: fn(&str) -> bool,
    pub rewrite: fn(&TranscodeRequest) -> Option<TranscodeRequest>,
}

/// The built-in cascade, in the order it is tried.
#[must_use]
pub fn default_strategies() -> Vec<FallbackStrategy> {
    vec![
        FallbackStrategy {
            name: "codec_fallback",
            matches: |e| contains_any(e, &["codec", "encoder", "decoder", "profile"]),
            rewrite: |req| {
                if req.video_codec == "h264" {
                    return None;
                }
                let mut next = req.clone();
                next.video_codec = "h264".to_string();
                Some(next)
            },
        },
        FallbackStrategy {
            name: "quality_reduction",
            matches: |e| contains_any(e, &["performance", "too slow", "speed", "realtime"]),
            rewrite: |req| {
                if req.quality <= 20 {
                    return None;
                }
                let mut next = req.clone();
                next.quality = next.quality.saturating_sub(20).max(20);
                Some(next)
            },
        },
        FallbackStrategy {
            name: "resolution_downscale",
            matches: |e| contains_any(e, &["resource", "memory", "oom", "capacity"]),
            rewrite: |req| {
                let current = req.target_resolution.map(|(_, h)| h);
                let next_height = match current {
                    None => 720,
                    Some(h) if h > 720 => 720,
                    Some(h) if h > 480 => 480,
                    Some(_) => return None,
                };
                let mut next = req.clone();
                next.target_resolution = Some((0, next_height));
                Some(next)
            },
        },
        FallbackStrategy {
            name: "container_fallback",
            matches: |e| contains_any(e, &["container", "format", "muxer", "manifest"]),
            rewrite: |req| {
                if req.output_container == OutputContainer::Mp4 {
                    return None;
                }
                let mut next = req.clone();
                next.output_container = OutputContainer::Mp4;
                next.enable_abr = false;
                Some(next)
            },
        },
        FallbackStrategy {
            name: "disable_abr",
            matches: |e| contains_any(e, &["abr", "adaptive", "variant", "rendition"]),
            rewrite: |req| {
                if !req.enable_abr {
                    return None;
                }
                let mut next = req.clone();
                next.enable_abr = false;
                Some(next)
            },
        },
    ]
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Drives an attempt closure through the cascade.
pub struct FallbackEngine {
    strategies: Vec<FallbackStrategy>,
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
        }
    }
}

/// Outcome of a successful cascade run: the handle plus the request that
/// actually worked (which the session row must reflect for replay).
#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub value: T,
    pub effective_request: TranscodeRequest,
    pub fallbacks_applied: usize,
}

impl FallbackEngine {
    #[must_use]
    pub fn new(strategies: Vec<FallbackStrategy>) -> Self {
        Self { strategies }
    }

    /// Try the original request, then walk the cascade. Strategies whose
    /// predicate does not match the current failure are skipped; each
    /// applied strategy mutates the request the next attempt uses. When the
    /// cascade is exhausted the ORIGINAL error is returned, wrapped.
    pub async fn execute<T, F, Fut>(
        &self,
        request: &TranscodeRequest,
        mut attempt: F,
    ) -> Result<FallbackOutcome<T>>
    where
        F: FnMut(TranscodeRequest) -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut current = request.clone();

        let original_err = match attempt(current.clone()).await {
            Ok(value) => {
                return Ok(FallbackOutcome {
                    value,
                    effective_request: current,
                    fallbacks_applied: 0,
                })
            }
            Err(e) => e,
        };

        let mut last_err_text = original_err.to_string();
        let mut applied = 0usize;

        for strategy in &self.strategies {
            if !(strategy.matches)(&last_err_text) {
                continue;
            }
            let Some(next) = (strategy.rewrite)(&current) else {
                continue;
            };

            info!(strategy = strategy.name, "applying fallback strategy");
            applied += 1;
            current = next;

            match attempt(current.clone()).await {
                Ok(value) => {
                    return Ok(FallbackOutcome {
                        value,
                        effective_request: current,
                        fallbacks_applied: applied,
                    })
                }
                Err(e) => {
                    warn!(strategy = strategy.name, error = %e, "fallback attempt failed");
                    last_err_text = e.to_string();
                }
            }
        }

        Err(Error::from(original_err))
    }
}
