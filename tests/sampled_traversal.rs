mod common;

use common::*;
use qbranch::prelude::*;
use std::num::NonZeroUsize;

fn shots(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn biased_measurement(theta: f64) -> (Circuit<Gate<f64>, Observable<f64>>, usize) {
    let mut b = Builder::new();
    b.apply(Gate::ry(0, theta));
    let m = b.measure(0);
    b.apply_if(Condition::is_one(m), Gate::x(1));
    let dist = b.mid_circuit(vec![m]);
    (b.build().unwrap(), dist)
}

#[test]
fn same_seed_same_shots() {
    let (circuit, _) = biased_measurement(1.3);
    let engine = engine();
    let cancel = CancellationToken::new();
    let initial = LocalState::new(2);
    let a = engine
        .run_sampled(&circuit, &initial, shots(200), 17, &cancel)
        .unwrap();
    let b = engine
        .run_sampled(&circuit, &initial, shots(200), 17, &cancel)
        .unwrap();
    assert_eq!(a.len(), 200);
    assert_eq!(a, b);

    let mode = ExecutionMode::sampled(200, 17).unwrap();
    let c = engine.run(&circuit, &initial, mode, &cancel).unwrap();
    assert_eq!(c.as_sampled(), Some(&a));

    let d = engine
        .run_sampled(&circuit, &initial, shots(200), 18, &cancel)
        .unwrap();
    assert_ne!(a, d);
}

#[test]
fn shots_follow_one_path() {
    let (circuit, _) = biased_measurement(1.3);
    let result = engine()
        .run_sampled(
            &circuit,
            &LocalState::new(2),
            shots(50),
            3,
            &CancellationToken::new(),
        )
        .unwrap();
    for shot in result.shots() {
        assert_eq!(shot.outcomes().unwrap().len(), 1);
        assert_eq!(shot.values().unwrap().len(), 1);
    }
}

#[test]
fn empirical_distribution_converges() {
    let theta = 2.0f64;
    let (circuit, dist) = biased_measurement(theta);
    let engine = engine();
    let cancel = CancellationToken::new();
    let initial = LocalState::new(2);

    let exact = engine.run_analytic(&circuit, &initial, &cancel).unwrap();
    let sampled = engine
        .run_sampled(&circuit, &initial, shots(4000), 2024, &cancel)
        .unwrap();
    let empirical = sampled.empirical_distribution(dist, 2).unwrap();
    assert_all_close(&empirical, exact.probabilities(dist).unwrap(), 0.03);
}

#[test]
fn final_probabilities_are_drawn_per_shot() {
    let mut b = Builder::new();
    b.apply(Gate::h(0)).apply(Gate::cnot(0, 1));
    let bits = b.probabilities(vec![0, 1]);
    let circuit = b.build().unwrap();
    let result = engine()
        .run_sampled(
            &circuit,
            &LocalState::new(2),
            shots(500),
            9,
            &CancellationToken::new(),
        )
        .unwrap();
    let counts = result.counts(bits);
    assert_eq!(counts.keys().copied().collect::<Vec<_>>(), vec![0b00, 0b11]);
    assert_eq!(counts.values().sum::<usize>(), 500);
}

#[test]
fn expectation_is_exact_per_shot() {
    let mut b = Builder::new();
    b.apply(Gate::h(0));
    b.measure(0);
    let z = b.expectation(Observable::z(0));
    let circuit = b.build().unwrap();
    let result = engine()
        .run_sampled(
            &circuit,
            &LocalState::new(1),
            shots(2000),
            77,
            &CancellationToken::new(),
        )
        .unwrap();
    for shot in result.shots() {
        let e = shot.values().unwrap()[z].expectation().unwrap();
        assert_close(e.abs(), 1.0, 1e-12);
    }
    assert_close(result.mean_expectation(z).unwrap(), 0.0, 0.1);
}

#[test]
fn postselection_never_yields_rejected_outcome() {
    let mut b = Builder::new();
    b.apply(Gate::h(0));
    let m = b.postselect(0, 1);
    let dist = b.mid_circuit(vec![m]);
    let circuit = b.build().unwrap();

    for retries in [0, 1, 100] {
        let engine = engine_with(EngineConfig::default().with_max_postselection_retries(retries));
        let result = engine
            .run_sampled(
                &circuit,
                &LocalState::new(1),
                shots(300),
                5,
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(result.len(), 300);
        for shot in result.shots() {
            match shot {
                ShotRecord::Sample {
                    outcomes,
                    values,
                    attempts,
                } => {
                    assert_eq!(outcomes, &vec![(m, 1)]);
                    assert_eq!(values[dist], SampleValue::Bits(1));
                    assert!(*attempts >= 1 && *attempts <= retries + 1);
                }
                ShotRecord::PostselectionExhausted { attempts } => {
                    assert_eq!(*attempts, retries + 1)
                }
                ShotRecord::Degenerate { .. } => panic!("unexpected degenerate shot"),
            }
        }
        assert_eq!(
            result.successful_shots() + result.exhausted_shots(),
            result.len()
        );
        if retries == 0 {
            // Half the shots are rejected on their only attempt.
            assert!(result.exhausted_shots() > 100 && result.exhausted_shots() < 200);
        }
    }
}

#[test]
fn impossible_postselection_exhausts_every_shot() {
    let mut b = Builder::new();
    b.apply(Gate::x(0));
    b.postselect(0, 0);
    b.expectation(Observable::z(0));
    let circuit = b.build().unwrap();
    let engine = engine_with(EngineConfig::default().with_max_postselection_retries(3));
    let result = engine
        .run_sampled(
            &circuit,
            &LocalState::new(1),
            shots(10),
            1,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(result.exhausted_shots(), 10);
    assert!(result
        .shots()
        .iter()
        .all(|s| *s == ShotRecord::PostselectionExhausted { attempts: 4 }));
    assert_eq!(result.mean_expectation(0), None);
}

#[test]
fn degenerate_shots_can_be_isolated() {
    let mut b = Builder::new();
    b.apply(Gate::h(0));
    b.measure(0);
    let circuit = b.build().unwrap();
    let config = EngineConfig::default().with_isolated_shot_failures(true);
    let engine: TraversalEngine<_, f64> = TraversalEngine::new(FaultyBackend::skewed(0.25), config);
    let result = engine
        .run_sampled(
            &circuit,
            &LocalState::new(1),
            shots(4),
            0,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(result.degenerate_shots(), 4);
    assert!(matches!(
        &result.shots()[0],
        ShotRecord::Degenerate { step: 1, .. }
    ));

    let strict: TraversalEngine<_, f64> =
        TraversalEngine::new(FaultyBackend::skewed(0.25), EngineConfig::default());
    let err = strict
        .run_sampled(
            &circuit,
            &LocalState::new(1),
            shots(4),
            0,
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TraversalError::NumericalDegeneracy { step: 1, .. }
    ));
}
