//! Non-remappable region ledger.
//!
//! When a method is patched while some thread still executes an older
//! version of it, the runtime keeps reporting locations in the old body. The
//! ledger remembers, per method version, where those old locations live in the
//! latest applied source so they can be reported at the right place.

use std::collections::BTreeMap;

use crate::active_statement::ManagedMethodId;
use crate::span::{self, SequencePointUpdates, SourceFileSpan};

/// `old_span` in a stale method version corresponds to `new_span` in the
/// latest committed source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonRemappableRegion {
    pub old_span: SourceFileSpan,
    pub new_span: SourceFileSpan,
    pub is_exception_region: bool,
}

impl NonRemappableRegion {
    pub fn new(old_span: SourceFileSpan, new_span: SourceFileSpan, is_exception_region: bool) -> Self {
        Self {
            old_span,
            new_span,
            is_exception_region,
        }
    }

    pub fn line_delta(&self) -> i32 {
        span::line_delta(&self.old_span.span, &self.new_span.span)
    }

    fn with_new_span(&self, new_span: SourceFileSpan) -> Self {
        Self {
            new_span,
            ..self.clone()
        }
    }
}

/// Corrections accrued over every generation applied during a session.
///
/// Immutable once built; commits produce a new ledger that replaces the
/// previous one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonRemappableRegionLedger {
    regions: BTreeMap<ManagedMethodId, Vec<NonRemappableRegion>>,
}

impl NonRemappableRegionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_regions(
        regions: impl IntoIterator<Item = (ManagedMethodId, NonRemappableRegion)>,
    ) -> Self {
        let mut ledger = Self::default();
        for (method, region) in regions {
            ledger.insert(method, region);
        }
        ledger
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Number of recorded regions across all methods.
    pub fn len(&self) -> usize {
        self.regions.values().map(Vec::len).sum()
    }

    pub fn regions(&self, method: &ManagedMethodId) -> &[NonRemappableRegion] {
        self.regions.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ManagedMethodId, &NonRemappableRegion)> {
        self.regions
            .iter()
            .flat_map(|(method, regions)| regions.iter().map(move |region| (method, region)))
    }

    /// Finds the active-statement region of `method` whose old span contains
    /// `span`.
    ///
    /// Among several containing regions the smallest old span wins; equal
    /// candidates resolve to the one recorded first.
    pub fn find_active_statement_region(
        &self,
        method: &ManagedMethodId,
        span: &SourceFileSpan,
    ) -> Option<&NonRemappableRegion> {
        let mut best: Option<&NonRemappableRegion> = None;
        for region in self.regions(method) {
            if region.is_exception_region || !region.old_span.contains(span) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => is_strictly_smaller(&region.old_span, &current.old_span),
            };
            if better {
                best = Some(region);
            }
        }
        best
    }

    /// The location `span` (reported in a version of `method`) has in the
    /// latest committed source. Returns `span` unchanged when no correction
    /// applies.
    pub fn up_to_date_span(&self, method: &ManagedMethodId, span: &SourceFileSpan) -> SourceFileSpan {
        match self.find_active_statement_region(method, span) {
            Some(region) => SourceFileSpan::new(
                region.new_span.path.clone(),
                span.span.add_line_delta(region.line_delta()),
            ),
            None => span.clone(),
        }
    }

    /// Up-to-date spans of exception regions recorded for `method`.
    pub fn exception_region_spans(&self, method: &ManagedMethodId) -> Vec<SourceFileSpan> {
        self.regions(method)
            .iter()
            .filter(|region| region.is_exception_region)
            .map(|region| region.new_span.clone())
            .collect()
    }

    /// Builds the ledger that results from committing a session which reported
    /// `new_regions` and moved lines according to `line_updates`.
    ///
    /// Previously recorded new spans are mapped through `line_updates`, so a
    /// thread that stays in an early version resolves through every later
    /// delta. A newly reported region replaces an existing one with the same
    /// method, old span and kind.
    pub fn merge(
        &self,
        new_regions: &[(ManagedMethodId, NonRemappableRegion)],
        line_updates: &[SequencePointUpdates],
    ) -> Self {
        let mut merged = Self::default();
        for (method, region) in self.iter() {
            let new_span = map_through_line_updates(&region.new_span, line_updates);
            merged.insert(*method, region.with_new_span(new_span));
        }
        for (method, region) in new_regions {
            merged.insert(*method, region.clone());
        }
        merged
    }

    fn insert(&mut self, method: ManagedMethodId, region: NonRemappableRegion) {
        let regions = self.regions.entry(method).or_default();
        match regions.iter_mut().find(|existing| {
            existing.old_span == region.old_span
                && existing.is_exception_region == region.is_exception_region
        }) {
            Some(existing) => *existing = region,
            None => regions.push(region),
        }
    }
}

fn map_through_line_updates(
    span: &SourceFileSpan,
    line_updates: &[SequencePointUpdates],
) -> SourceFileSpan {
    match line_updates
        .iter()
        .find(|updates| updates.file_name == span.path)
    {
        Some(updates) => span.with_span(updates.map_span(&span.span)),
        None => span.clone(),
    }
}

fn is_strictly_smaller(candidate: &SourceFileSpan, current: &SourceFileSpan) -> bool {
    current.span.contains(&candidate.span) && candidate.span != current.span
}
