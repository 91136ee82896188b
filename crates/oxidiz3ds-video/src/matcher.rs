//! Best-candidate search over the surfaces overlapping a request.
//!
//! Each [`MatchFlags`] bit enables one predicate. A candidate that satisfies an
//! enabled predicate replaces the current best when it ranks higher:
//!
//! 1. higher resolution scale,
//! 2. then valid over invalid,
//! 3. then a longer matched interval.
//!
//! Candidates are visited in ascending address order of the first cached run
//! they appear in and, within a run, by ascending [`SurfaceId`]. Only a strictly
//! better rank replaces the current best, so equal ranks resolve to the lowest
//! address and then to the oldest surface.
//!
//! [`SurfaceId`]: crate::surface::SurfaceId

use crate::interval::SurfaceInterval;
use crate::params::SurfaceParams;
use crate::surface::{Surface, SurfaceRef};
use bitflags::bitflags;
use std::collections::HashSet;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MatchFlags: u8 {
        /// Surface describes exactly the requested region
        const EXACT = 1 << 0;
        /// Surface contains the requested rectangle
        const SUB_RECT = 1 << 1;
        /// Surface can supply the validate interval by copy or fill
        const COPY = 1 << 2;
        /// Surface can be grown to cover the request
        const EXPAND = 1 << 3;
        /// Surface matches a texture copy byte range
        const TEX_COPY = 1 << 4;
        /// Also accept surfaces whose relevant region is invalid
        const INVALID = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleMatch {
    /// Only accept the same resolution scale
    Exact,
    /// Accept the same or a higher resolution scale
    Upscale,
    /// Accept any resolution scale
    Ignore,
}

impl ScaleMatch {
    fn accepts(self, requested: u16, candidate: u16) -> bool {
        match self {
            ScaleMatch::Exact => requested == candidate,
            ScaleMatch::Upscale => requested <= candidate,
            ScaleMatch::Ignore => true,
        }
    }
}

/// Returns the interval the candidate matched on, or `None`.
type Predicate<T> = fn(&Surface<T>, &SurfaceParams, Option<SurfaceInterval>) -> Option<SurfaceInterval>;

fn predicates<T>() -> [(MatchFlags, Predicate<T>); 5] {
    [
        (MatchFlags::EXACT, |surface, params, _| {
            surface.params.exact_match(params).then(|| surface.interval())
        }),
        (MatchFlags::SUB_RECT, |surface, params, _| {
            surface.params.can_sub_rect(params).then(|| surface.interval())
        }),
        (MatchFlags::COPY, |surface, params, validate| {
            let Some(validate) = validate else {
                debug_assert!(false, "copy match without a validate interval");
                return None;
            };
            let copy_interval = surface.copyable_interval(&params.from_interval(validate));
            let matched = !copy_interval.intersect(&validate).is_empty()
                && surface.can_copy(params, copy_interval);
            matched.then_some(copy_interval)
        }),
        (MatchFlags::EXPAND, |surface, params, _| {
            surface.params.can_expand(params).then(|| surface.interval())
        }),
        (MatchFlags::TEX_COPY, |surface, params, _| {
            surface.params.can_tex_copy(params).then(|| surface.interval())
        }),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    res_scale: u16,
    valid: bool,
    length: u32,
}

/// Picks the best surface among `candidates` for `params`.
pub fn find_match<'a, T: 'a>(
    candidates: impl IntoIterator<Item = &'a SurfaceRef<T>>,
    params: &SurfaceParams,
    flags: MatchFlags,
    scale: ScaleMatch,
    validate_interval: Option<SurfaceInterval>,
) -> Option<SurfaceRef<T>> {
    let table = predicates::<T>();
    let mut seen = HashSet::new();
    let mut best: Option<(Rank, &'a SurfaceRef<T>)> = None;

    for candidate in candidates {
        if !seen.insert(candidate.id()) {
            continue;
        }
        let surface = candidate.borrow();

        let is_valid = flags.contains(MatchFlags::COPY)
            || surface.is_region_valid(validate_interval.unwrap_or_else(|| params.interval()));
        if !is_valid && !flags.contains(MatchFlags::INVALID) {
            continue;
        }
        let scale_ok = surface.is_fill() || scale.accepts(params.res_scale, surface.params.res_scale);

        for (flag, predicate) in &table {
            if !flags.contains(*flag) {
                continue;
            }
            let Some(interval) = predicate(&*surface, params, validate_interval) else {
                continue;
            };
            if !scale_ok {
                continue;
            }

            let rank = Rank {
                res_scale: surface.params.res_scale,
                valid: is_valid,
                length: interval.len(),
            };
            if best.as_ref().is_none_or(|(best_rank, _)| rank > *best_rank) {
                best = Some((rank, candidate));
            }
        }
    }

    best.map(|(_, surface)| surface.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel_format::PixelFormat;
    use crate::surface::SurfaceId;

    fn make(id: u64, params: SurfaceParams, valid: bool) -> SurfaceRef<()> {
        let mut surface = Surface::new(SurfaceId(id), params, None);
        if valid {
            surface.mark_valid(params.interval());
        }
        SurfaceRef::new(surface)
    }

    fn rgba8(addr: u32, width: u32, height: u32, res_scale: u16) -> SurfaceParams {
        SurfaceParams {
            addr,
            width,
            height,
            res_scale,
            pixel_format: PixelFormat::Rgba8,
            ..Default::default()
        }
        .updated()
    }

    #[test]
    fn test_higher_scale_wins_under_upscale() {
        let low = make(0, rgba8(0x1000, 64, 64, 1), true);
        let high = make(1, rgba8(0x1000, 64, 64, 2), true);
        let query = rgba8(0x1000, 64, 64, 1);

        let found = find_match([&low, &high], &query, MatchFlags::EXACT, ScaleMatch::Upscale, None);
        assert_eq!(found, Some(high.clone()));

        let exact = find_match([&low, &high], &query, MatchFlags::EXACT, ScaleMatch::Exact, None);
        assert_eq!(exact, Some(low));
    }

    #[test]
    fn test_invalid_candidates_need_flag() {
        let surface = make(0, rgba8(0x1000, 16, 16, 1), false);
        let query = rgba8(0x1000, 16, 16, 1);
        assert_eq!(find_match([&surface], &query, MatchFlags::EXACT, ScaleMatch::Exact, None), None);
        assert!(
            find_match(
                [&surface],
                &query,
                MatchFlags::EXACT | MatchFlags::INVALID,
                ScaleMatch::Exact,
                None
            )
            .is_some()
        );
    }

    #[test]
    fn test_valid_beats_invalid_then_longer_interval() {
        let invalid_big = make(0, rgba8(0x1000, 16, 32, 1), false);
        let valid_small = make(1, rgba8(0x1000, 16, 16, 1), true);
        let query = rgba8(0x1000, 16, 4, 1);
        let flags = MatchFlags::SUB_RECT | MatchFlags::INVALID;

        let found = find_match([&invalid_big, &valid_small], &query, flags, ScaleMatch::Exact, None);
        assert_eq!(found, Some(valid_small.clone()));

        let valid_big = make(2, rgba8(0x1000, 16, 32, 1), true);
        let found = find_match([&valid_small, &valid_big], &query, flags, ScaleMatch::Exact, None);
        assert_eq!(found, Some(valid_big));
    }

    #[test]
    fn test_ties_go_to_first_visited() {
        let a = make(5, rgba8(0x1000, 16, 16, 1), true);
        let b = make(6, rgba8(0x1000, 16, 16, 1), true);
        let query = rgba8(0x1000, 16, 16, 1);
        let found = find_match([&a, &b, &a], &query, MatchFlags::EXACT, ScaleMatch::Exact, None);
        assert_eq!(found, Some(a));
    }

    #[test]
    fn test_copy_uses_copyable_interval() {
        let source = make(0, rgba8(0x1000, 16, 16, 1), false);
        source.borrow_mut().mark_valid(SurfaceInterval::new(0x1000, 0x1100));

        let dest = SurfaceParams {
            pixel_format: PixelFormat::Rgba8,
            ..rgba8(0x1000, 16, 16, 1)
        };
        let validate = SurfaceInterval::new(0x1000, 0x1400);
        let found = find_match([&source], &dest, MatchFlags::COPY, ScaleMatch::Ignore, Some(validate));
        assert_eq!(found, Some(source));
    }
}
