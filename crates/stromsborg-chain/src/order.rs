#![forbid(unsafe_code)]

//! Where a new processor goes in a phase-sorted list.
//!
//! Pure functions over descriptors; the chains apply the result.

use std::ops::Range;

use stromsborg_core::{Error, Result};

use crate::processor::ProcessorDescriptor;

/// One position in a rebuilt phase segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// The existing entry at this absolute index.
    Existing(usize),
    /// The processor being inserted.
    New,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Insert at this absolute index; nothing else moves.
    At(usize),
    /// The phase segment `range` must be rebuilt in `order`, which holds
    /// every existing entry of the segment plus the new processor.
    Rebuild { range: Range<usize>, order: Vec<Slot> },
}

/// `[phase_start, phase_end)` of `phase` in a phase-sorted list.
pub fn phase_range(
    existing: &[ProcessorDescriptor],
    phase: crate::processor::Phase,
) -> Range<usize> {
    let start = existing
        .iter()
        .position(|d| d.phase >= phase)
        .unwrap_or(existing.len());
    let end = existing[start..]
        .iter()
        .position(|d| d.phase > phase)
        .map_or(existing.len(), |offset| start + offset);
    start..end
}

/// Decide where `new` goes in `existing`.
///
/// The preferred index follows the processor's own constraints: after the
/// last must-follow match, else before the first must-precede match, else
/// at the start of the phase. Constraints of the already-inserted
/// processors against the new kind then bound a legal window the index is
/// clamped into. An empty window means the segment needs a topological
/// rebuild.
pub fn place(existing: &[ProcessorDescriptor], new: &ProcessorDescriptor) -> Result<Placement> {
    let range = phase_range(existing, new.phase);
    let segment = &existing[range.clone()];

    let after_last = segment
        .iter()
        .rposition(|d| new.must_follow.contains(&d.kind))
        .map(|i| range.start + i + 1);
    let before_first = segment
        .iter()
        .position(|d| new.must_precede.contains(&d.kind))
        .map(|i| range.start + i);

    let preferred = match (new.must_follow.is_empty(), new.must_precede.is_empty()) {
        (true, true) => range.start,
        (false, true) => after_last.unwrap_or(range.end),
        (true, false) => before_first.unwrap_or(range.start),
        (false, false) => after_last.or(before_first).unwrap_or(range.start),
    };

    let lo = segment
        .iter()
        .enumerate()
        .filter(|(_, d)| d.orders_before(new))
        .map(|(i, _)| range.start + i + 1)
        .max()
        .unwrap_or(range.start);
    let hi = segment
        .iter()
        .enumerate()
        .filter(|(_, d)| new.orders_before(d))
        .map(|(i, _)| range.start + i)
        .min()
        .unwrap_or(range.end);

    if lo <= hi {
        return Ok(Placement::At(preferred.clamp(lo, hi)));
    }

    let offset = preferred.clamp(range.start, range.end) - range.start;
    let order = stable_topological(segment, new, offset, range.start)?;
    Ok(Placement::Rebuild { range, order })
}

// Kahn's algorithm; among ready nodes the one earliest in the current
// sequence (with the new processor at `offset`) goes first.
fn stable_topological(
    segment: &[ProcessorDescriptor],
    new: &ProcessorDescriptor,
    offset: usize,
    base: usize,
) -> Result<Vec<Slot>> {
    let mut nodes: Vec<(Slot, &ProcessorDescriptor)> = segment
        .iter()
        .enumerate()
        .map(|(i, d)| (Slot::Existing(base + i), d))
        .collect();
    nodes.insert(offset, (Slot::New, new));

    let n = nodes.len();
    let mut indegree = vec![0usize; n];
    for a in 0..n {
        for b in 0..n {
            if a != b && nodes[a].1.orders_before(nodes[b].1) {
                indegree[b] += 1;
            }
        }
    }

    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let Some(next) = (0..n).find(|&i| !done[i] && indegree[i] == 0) else {
            return Err(Error::InternalFailure(format!(
                "cyclic ordering constraints while inserting {} ({})",
                new.kind, new.id
            )));
        };
        done[next] = true;
        order.push(nodes[next].0);
        for b in 0..n {
            if !done[b] && nodes[next].1.orders_before(nodes[b].1) {
                indegree[b] -= 1;
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{Phase, ProcessorKind};

    fn d(kind: ProcessorKind, phase: Phase) -> ProcessorDescriptor {
        ProcessorDescriptor::new(kind, phase)
    }

    /// Apply placements the way the chains do and return the kinds.
    fn build(descs: Vec<ProcessorDescriptor>) -> Vec<ProcessorKind> {
        let mut list: Vec<ProcessorDescriptor> = Vec::new();
        for new in descs {
            match place(&list, &new).unwrap() {
                Placement::At(i) => list.insert(i, new),
                Placement::Rebuild { range, order } => {
                    let rebuilt: Vec<_> = order
                        .iter()
                        .map(|slot| match slot {
                            Slot::Existing(i) => list[*i].clone(),
                            Slot::New => new.clone(),
                        })
                        .collect();
                    list.splice(range, rebuilt);
                }
            }
        }
        list.into_iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_logger_signer_canonicalizer_scenario() {
        use ProcessorKind::*;
        let kinds = build(vec![
            d(EventLogger, Phase::PostProcessing),
            d(Signature, Phase::Processing).after(SignatureReference),
            d(SignatureReference, Phase::Processing),
        ]);
        assert_eq!(kinds, [SignatureReference, Signature, EventLogger]);
    }

    #[test]
    fn test_unconstrained_is_newest_first() {
        use ProcessorKind::*;
        let kinds = build(vec![
            d(Custom("a"), Phase::Processing),
            d(Custom("b"), Phase::Processing),
            d(Custom("pre"), Phase::PreProcessing),
        ]);
        assert_eq!(kinds, [Custom("pre"), Custom("b"), Custom("a")]);
    }

    #[test]
    fn test_must_follow_without_match_goes_to_phase_end() {
        use ProcessorKind::*;
        let kinds = build(vec![
            d(Custom("a"), Phase::Processing),
            d(DocumentWriter, Phase::PostProcessing),
            d(Signature, Phase::Processing).after(SignatureReference),
        ]);
        assert_eq!(kinds, [Custom("a"), Signature, DocumentWriter]);
    }

    #[test]
    fn test_must_precede_goes_before_first_match() {
        use ProcessorKind::*;
        let kinds = build(vec![
            d(Custom("a"), Phase::Processing),
            d(Encryption, Phase::Processing),
            d(Custom("b"), Phase::Processing),
            d(SignatureReference, Phase::Processing).before(Encryption),
        ]);
        assert_eq!(
            kinds,
            [Custom("b"), SignatureReference, Encryption, Custom("a")]
        );
    }

    #[test]
    fn test_both_prefers_must_follow() {
        use ProcessorKind::*;
        let kinds = build(vec![
            d(Encryption, Phase::Processing),
            d(SignatureReference, Phase::Processing),
            d(Signature, Phase::Processing)
                .after(SignatureReference)
                .before(Encryption),
        ]);
        // SignatureReference was inserted unconstrained in front of Encryption.
        assert_eq!(kinds, [SignatureReference, Signature, Encryption]);
    }

    #[test]
    fn test_rebuild_when_window_is_empty() {
        use ProcessorKind::*;
        // The unconstrained b lands in front of a; n must sit between a and b.
        let kinds = build(vec![
            d(Custom("a"), Phase::Processing),
            d(Custom("b"), Phase::Processing),
            d(Custom("n"), Phase::Processing)
                .after(Custom("a"))
                .before(Custom("b")),
        ]);
        assert_eq!(kinds, [Custom("a"), Custom("n"), Custom("b")]);
    }

    #[test]
    fn test_cycle_is_internal_failure() {
        use ProcessorKind::*;
        let b = d(Custom("b"), Phase::Processing).before(Custom("a"));
        let a = d(Custom("a"), Phase::Processing).before(Custom("b"));
        let err = place(&[b], &a).unwrap_err();
        assert!(matches!(err, Error::InternalFailure(_)));
    }

    #[test]
    fn test_rebuild_keeps_existing_order_where_free() {
        use ProcessorKind::*;
        // x and y are unrelated to the constraints, and keep their order.
        let existing = vec![
            d(Custom("b"), Phase::Processing),
            d(Custom("x"), Phase::Processing),
            d(Custom("a"), Phase::Processing),
            d(Custom("y"), Phase::Processing),
        ];
        let new = d(Custom("n"), Phase::Processing)
            .after(Custom("a"))
            .before(Custom("b"));
        match place(&existing, &new).unwrap() {
            Placement::Rebuild { range, order } => {
                assert_eq!(range, 0..4);
                let kinds: Vec<_> = order
                    .iter()
                    .map(|s| match s {
                        Slot::Existing(i) => existing[*i].kind,
                        Slot::New => new.kind,
                    })
                    .collect();
                let pos = |k| kinds.iter().position(|x| *x == k).unwrap();
                assert!(pos(Custom("a")) < pos(Custom("n")));
                assert!(pos(Custom("n")) < pos(Custom("b")));
                assert!(pos(Custom("x")) < pos(Custom("y")));
            }
            other => panic!("expected a rebuild, got {other:?}"),
        }
    }
}
