#![forbid(unsafe_code)]

use std::sync::Arc;

use proptest::prelude::*;
use stromsborg_chain::processors::PassThroughProcessor;
use stromsborg_chain::{OutputProcessorChain, Phase, ProcessorDescriptor, ProcessorKind, SecurityContext};

const NAMES: [&str; 7] = ["k0", "k1", "k2", "k3", "k4", "k5", "k6"];

fn stub(descriptor: ProcessorDescriptor) -> PassThroughProcessor {
    PassThroughProcessor::with_descriptor(descriptor)
}

/// An edge `(i, j, on_source)`: kind i must come before kind j, declared
/// on i (`must_precede`) or on j (`must_follow`).
type Edge = (usize, usize, bool);

fn descriptor(index: usize, edges: &[Edge]) -> ProcessorDescriptor {
    let mut desc = ProcessorDescriptor::new(ProcessorKind::Custom(NAMES[index]), Phase::Processing);
    for &(i, j, on_source) in edges {
        if on_source && i == index {
            desc = desc.before(ProcessorKind::Custom(NAMES[j]));
        }
        if !on_source && j == index {
            desc = desc.after(ProcessorKind::Custom(NAMES[i]));
        }
    }
    desc
}

fn build(order: &[usize], edges: &[Edge]) -> Vec<usize> {
    let mut chain = OutputProcessorChain::new(Arc::new(SecurityContext::default()));
    for &index in order {
        chain.insert(stub(descriptor(index, edges))).unwrap();
    }
    chain
        .descriptors()
        .iter()
        .map(|d| match d.kind {
            ProcessorKind::Custom(name) => NAMES.iter().position(|n| *n == name).unwrap(),
            other => panic!("unexpected kind {other}"),
        })
        .collect()
}

/// A constraint set that is acyclic by construction (edges only go from a
/// lower to a higher index) plus two insertion orders.
fn scenario() -> impl Strategy<Value = (Vec<Edge>, Vec<usize>, Vec<usize>)> {
    (2usize..=NAMES.len()).prop_flat_map(|n| {
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        let edges = proptest::collection::vec((any::<bool>(), any::<bool>()), pairs.len())
            .prop_map(move |flags| {
                pairs
                    .iter()
                    .zip(flags)
                    .filter(|(_, (present, _))| *present)
                    .map(|(&(i, j), (_, on_source))| (i, j, on_source))
                    .collect::<Vec<_>>()
            });
        let indices: Vec<usize> = (0..n).collect();
        (
            edges,
            Just(indices.clone()).prop_shuffle(),
            Just(indices).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn insertion_satisfies_every_constraint((edges, first, _second) in scenario()) {
        let built = build(&first, &edges);
        prop_assert_eq!(built.len(), first.len());
        let pos = |k: usize| built.iter().position(|x| *x == k).unwrap();
        for &(i, j, _) in &edges {
            prop_assert!(pos(i) < pos(j), "{} must precede {} in {:?}", i, j, built);
        }
    }

    #[test]
    fn constrained_pairs_do_not_depend_on_insertion_order((edges, first, second) in scenario()) {
        let a = build(&first, &edges);
        let b = build(&second, &edges);
        for &(i, j, _) in &edges {
            let before_a = a.iter().position(|x| *x == i) < a.iter().position(|x| *x == j);
            let before_b = b.iter().position(|x| *x == i) < b.iter().position(|x| *x == j);
            prop_assert_eq!(before_a, before_b);
        }
    }
}

#[test]
fn logger_signer_canonicalizer_scenario() {
    let mut chain = OutputProcessorChain::new(Arc::new(SecurityContext::default()));
    chain
        .insert(stub(ProcessorDescriptor::new(
            ProcessorKind::EventLogger,
            Phase::PostProcessing,
        )))
        .unwrap();
    chain
        .insert(stub(
            ProcessorDescriptor::new(ProcessorKind::Signature, Phase::Processing)
                .after(ProcessorKind::SignatureReference),
        ))
        .unwrap();
    chain
        .insert(stub(ProcessorDescriptor::new(
            ProcessorKind::SignatureReference,
            Phase::Processing,
        )))
        .unwrap();
    let kinds: Vec<_> = chain.descriptors().into_iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        [
            ProcessorKind::SignatureReference,
            ProcessorKind::Signature,
            ProcessorKind::EventLogger
        ]
    );
}
