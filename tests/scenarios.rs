//! End-to-end scenarios through the intelligence engine

use panda_live::detect::signals::{SignalDetail, SignalKind};
use panda_live::detect::threshold::ThresholdKind;
use panda_live::lifecycle::{LifecycleState, Severity, Trigger};
use panda_live::stream::transfer::{Direction, TransferEvent};
use panda_live::{Config, IntelligenceEngine, IntelligenceEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn engine() -> IntelligenceEngine {
    IntelligenceEngine::new(&Config::default())
}

fn buy(wallet: &str, amount: Decimal, ts: i64) -> TransferEvent {
    TransferEvent::new(wallet, Direction::In, amount, ts, format!("{}@{}", wallet, ts))
}

fn thresholds(events: &[IntelligenceEvent]) -> Vec<(String, ThresholdKind, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            IntelligenceEvent::Threshold(t) => Some((t.wallet.clone(), t.kind, t.episode_id)),
            _ => None,
        })
        .collect()
}

fn signals(events: &[IntelligenceEvent], kind: SignalKind) -> Vec<&SignalDetail> {
    events
        .iter()
        .filter_map(|e| match e {
            IntelligenceEvent::Signal(s) if s.kind() == kind => Some(&s.detail),
            _ => None,
        })
        .collect()
}

fn signal_wallets(events: &[IntelligenceEvent], kind: SignalKind) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            IntelligenceEvent::Signal(s) if s.kind() == kind => s.wallet.clone(),
            _ => None,
        })
        .collect()
}

fn transitions(events: &[IntelligenceEvent]) -> Vec<(LifecycleState, LifecycleState)> {
    events
        .iter()
        .filter_map(|e| match e {
            IntelligenceEvent::Transition(t) => Some((t.from, t.to)),
            _ => None,
        })
        .collect()
}

/// Feed transfers in order, collecting every emitted event
fn feed(engine: &mut IntelligenceEngine, transfers: &[TransferEvent]) -> Vec<IntelligenceEvent> {
    let mut events = Vec::new();
    for transfer in transfers {
        events.extend(engine.process(transfer).unwrap());
    }
    events
}

#[test]
fn basic_latch_fires_each_kind_once() {
    let mut engine = engine();

    let first = engine.process(&buy("A", dec!(12), 0)).unwrap();
    assert_eq!(thresholds(&first), vec![("A".to_string(), ThresholdKind::Single, 1)]);

    // 20 in the 5-minute window, below 25; SINGLE already latched
    let second = engine.process(&buy("A", dec!(8), 30)).unwrap();
    assert!(thresholds(&second).is_empty());

    let third = engine.process(&buy("A", dec!(10), 60)).unwrap();
    assert_eq!(thresholds(&third), vec![("A".to_string(), ThresholdKind::Cum5m, 1)]);

    // everything above threshold again, nothing new to report
    let fourth = engine.process(&buy("A", dec!(11), 90)).unwrap();
    assert!(thresholds(&fourth).is_empty());
}

#[test]
fn coordination_across_three_wallets() {
    let mut engine = engine();
    let events = feed(
        &mut engine,
        &[buy("A", dec!(12), 1_000), buy("B", dec!(12), 1_020), buy("C", dec!(12), 1_040)],
    );

    assert_eq!(signal_wallets(&events, SignalKind::Coordination), vec!["C".to_string()]);
    match signals(&events, SignalKind::Coordination)[0] {
        SignalDetail::Coordination {
            wallet_count,
            window_secs,
            sample,
            ..
        } => {
            assert_eq!(*wallet_count, 3);
            assert_eq!(*window_secs, 60);
            assert_eq!(sample, &vec!["A".to_string(), "B".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(
        transitions(&events),
        vec![
            (LifecycleState::Quiet, LifecycleState::Ignition),
            (LifecycleState::Ignition, LifecycleState::CoordinationSpike),
        ]
    );
    let spike = events
        .iter()
        .find_map(|e| match e {
            IntelligenceEvent::Transition(t) if t.to == LifecycleState::CoordinationSpike => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(spike.severity, Some(Severity::S2));
    assert_eq!(spike.trigger, Trigger::Coordination { wallet_count: 3 });
    assert_eq!(engine.state().early_wallets().len(), 3);
}

#[test]
fn triple_crossing_runs_one_signal_pass() {
    let mut engine = engine();
    feed(&mut engine, &[buy("A", dec!(12), 0), buy("B", dec!(12), 10)]);

    // crosses SINGLE, CUM_5M and CUM_15M at once
    let events = engine.process(&buy("C", dec!(60), 20)).unwrap();
    assert_eq!(thresholds(&events).len(), 3);
    assert_eq!(signals(&events, SignalKind::Coordination).len(), 1);
    assert_eq!(signals(&events, SignalKind::Timing).len(), 1);

    let timestamps: Vec<i64> = events
        .iter()
        .filter(|e| matches!(e, IntelligenceEvent::Signal(_)))
        .map(|e| e.timestamp())
        .collect();
    assert_eq!(timestamps, vec![20, 20]);
}

#[test]
fn coordination_refires_on_later_transfer() {
    let mut engine = engine();
    let events = feed(
        &mut engine,
        &[
            buy("A", dec!(12), 0),
            buy("B", dec!(12), 10),
            buy("C", dec!(12), 20),
            // C crosses CUM_5M on a separate transfer
            buy("C", dec!(13), 30),
        ],
    );
    assert_eq!(
        signal_wallets(&events, SignalKind::Coordination),
        vec!["C".to_string(), "C".to_string()]
    );
}

#[test]
fn episode_boundary_opens_new_episode() {
    let mut engine = engine();
    engine.process(&buy("A", dec!(12), 1_000)).unwrap();
    assert_eq!(engine.state().episode_id(), 1);

    let events = engine.process(&buy("B", dec!(12), 1_700)).unwrap();

    // the old episode closes before the new threshold is reported
    match &events[0] {
        IntelligenceEvent::Transition(t) => {
            assert_eq!(t.to, LifecycleState::Quiet);
            assert_eq!(t.episode_id, 1);
            assert_eq!(t.trigger, Trigger::EpisodeEnd { silence_secs: 700 });
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(thresholds(&events), vec![("B".to_string(), ThresholdKind::Single, 2)]);
    assert_eq!(engine.state().episode_id(), 2);
    assert_eq!(engine.state().state(), LifecycleState::Ignition);

    // A's latch did not leak into the new episode
    assert!(engine.state().ledger().get("A").is_none());
    let again = engine.process(&buy("A", dec!(12), 1_710)).unwrap();
    assert_eq!(thresholds(&again), vec![("A".to_string(), ThresholdKind::Single, 2)]);
}

#[test]
fn episode_continues_inside_boundary() {
    let mut engine = engine();
    engine.process(&buy("A", dec!(12), 1_000)).unwrap();

    let events = engine.process(&buy("B", dec!(12), 1_500)).unwrap();
    assert_eq!(thresholds(&events), vec![("B".to_string(), ThresholdKind::Single, 1)]);
    assert!(transitions(&events).is_empty());
    assert_eq!(engine.state().episode_id(), 1);
    assert!(engine.state().early_wallets().contains("A"));
}

#[test]
fn out_of_order_event_never_closes_episode() {
    let mut engine = engine();
    engine.process(&buy("A", dec!(12), 2_000)).unwrap();
    let events = engine.process(&buy("B", dec!(12), 1_000)).unwrap();
    assert_eq!(thresholds(&events), vec![("B".to_string(), ThresholdKind::Single, 1)]);
    assert_eq!(engine.state().episode_id(), 1);
}

#[test]
fn rejected_transfer_does_not_disturb_stream() {
    let mut engine = engine();
    engine.process(&buy("A", dec!(12), 0)).unwrap();

    let bad = TransferEvent::new("B", Direction::In, dec!(-1), 10, "bad");
    assert!(engine.process(&bad).unwrap_err().is_input_error());

    let events = engine.process(&buy("B", dec!(12), 20)).unwrap();
    assert_eq!(thresholds(&events), vec![("B".to_string(), ThresholdKind::Single, 1)]);
}

#[test]
fn wallet_seen_before_episode_start_is_late() {
    let mut engine = engine();
    engine.process(&buy("W", dec!(1), 800)).unwrap();
    engine.process(&buy("A", dec!(12), 1_000)).unwrap();

    let events = engine.process(&buy("W", dec!(12), 1_050)).unwrap();
    assert_eq!(thresholds(&events), vec![("W".to_string(), ThresholdKind::Single, 1)]);
    assert!(signals(&events, SignalKind::Timing).is_empty());
    assert_eq!(
        engine.state().early_wallets().iter().cloned().collect::<Vec<_>>(),
        vec!["A".to_string()]
    );
}

/// Tight timings so ten early wallets reach a density peak inside two
/// minutes; silence comes from phase alone.
fn peak_config() -> Config {
    let mut config = Config::default();
    config.signals.early_window_secs = 50;
    config.signals.silence_fallback_secs = 3_600;
    config.signals.silence_grace_secs = 60;
    config.lifecycle.spike_sustain_secs = 30;
    config.lifecycle.peak_min_density = 11;
    config
}

/// E0..E9 cross early, E0 and E1 persist, late N1 pushes density to 11.
fn drive_to_peak(engine: &mut IntelligenceEngine) -> Vec<IntelligenceEvent> {
    let early: Vec<_> = (0..10)
        .map(|i| buy(&format!("E{}", i), dec!(12), i as i64 * 5))
        .collect();
    let mut events = feed(engine, &early);
    assert_eq!(engine.state().state(), LifecycleState::EarlyPhase);
    assert_eq!(engine.state().early_wallets().len(), 10);

    events.extend(feed(engine, &[buy("E0", dec!(13), 60), buy("E1", dec!(13), 65)]));
    assert_eq!(engine.state().state(), LifecycleState::PersistenceConfirmed);

    events.extend(feed(engine, &[buy("N1", dec!(12), 70)]));
    assert_eq!(engine.state().state(), LifecycleState::PressurePeaking);
    assert_eq!(engine.state().episode_max_density(), 11);
    events
}

/// Three early wallets keep trading at the peak; the other seven go quiet.
fn drive_to_exhaustion(engine: &mut IntelligenceEngine) -> Vec<IntelligenceEvent> {
    let mut events = drive_to_peak(engine);

    let at_peak = feed(
        engine,
        &[buy("E7", dec!(1), 80), buy("E8", dec!(1), 85), buy("E9", dec!(1), 90)],
    );
    assert!(signals(&at_peak, SignalKind::Exhaustion).is_empty());
    assert_eq!(engine.state().state(), LifecycleState::PressurePeaking);
    events.extend(at_peak);

    events.extend(engine.advance(130));
    events
}

#[test]
fn peak_is_held_past_the_entering_transfer() {
    let mut engine = IntelligenceEngine::new(&peak_config());
    let events = drive_to_peak(&mut engine);

    let last: Vec<_> = transitions(&events).into_iter().rev().take(2).collect();
    assert_eq!(
        last,
        vec![
            (LifecycleState::ParticipationExpansion, LifecycleState::PressurePeaking),
            (LifecycleState::PersistenceConfirmed, LifecycleState::ParticipationExpansion),
        ]
    );
    assert!(signals(&events, SignalKind::Exhaustion).is_empty());
}

#[test]
fn seven_of_ten_silent_triggers_exhaustion() {
    let mut engine = IntelligenceEngine::new(&peak_config());
    let events = drive_to_exhaustion(&mut engine);

    assert_eq!(engine.state().state(), LifecycleState::ExhaustionDetected);
    let exhaustion = signals(&events, SignalKind::Exhaustion);
    assert_eq!(exhaustion.len(), 1);
    assert_eq!(
        exhaustion[0],
        &SignalDetail::Exhaustion {
            silent: 7,
            early: 10,
            fraction: 0.7
        }
    );

    let exhausted = events
        .iter()
        .find_map(|e| match e {
            IntelligenceEvent::Transition(t) if t.to == LifecycleState::ExhaustionDetected => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(exhausted.from, LifecycleState::PressurePeaking);
    assert_eq!(exhausted.timestamp, 130);
    assert_eq!(exhausted.severity, Some(Severity::S4));

    let path: Vec<_> = transitions(&events).into_iter().map(|(_, to)| to).collect();
    assert_eq!(
        path,
        vec![
            LifecycleState::Ignition,
            LifecycleState::CoordinationSpike,
            LifecycleState::EarlyPhase,
            LifecycleState::PersistenceConfirmed,
            LifecycleState::ParticipationExpansion,
            LifecycleState::PressurePeaking,
            LifecycleState::ExhaustionDetected,
        ]
    );
}

#[test]
fn burst_reverses_exhaustion() {
    let mut engine = IntelligenceEngine::new(&peak_config());
    drive_to_exhaustion(&mut engine);

    // a lone crossing is not a burst
    let lone = engine.process(&buy("N2", dec!(12), 200)).unwrap();
    assert!(transitions(&lone).is_empty());

    let burst = engine.process(&buy("N3", dec!(12), 210)).unwrap();
    assert_eq!(
        transitions(&burst),
        vec![(LifecycleState::ExhaustionDetected, LifecycleState::ParticipationExpansion)]
    );
    let reversal = burst
        .iter()
        .find_map(|e| match e {
            IntelligenceEvent::Transition(t) => Some(t),
            _ => None,
        })
        .unwrap();
    assert_eq!(reversal.trigger, Trigger::BurstReversal { wallets: 2 });
    assert_eq!(reversal.severity, Some(Severity::S3));
    assert_eq!(engine.state().episode_id(), 1);
}

#[test]
fn second_peak_without_new_exhaustion_holds() {
    let mut engine = IntelligenceEngine::new(&peak_config());
    let mut events = drive_to_exhaustion(&mut engine);
    events.extend(feed(&mut engine, &[buy("N2", dec!(12), 200), buy("N3", dec!(12), 210)]));
    assert_eq!(engine.state().state(), LifecycleState::ParticipationExpansion);

    // density climbs past the old peak of eleven
    let wave: Vec<_> = (4..=14)
        .map(|i| buy(&format!("N{}", i), dec!(12), 200 + i as i64 * 5))
        .collect();
    events.extend(feed(&mut engine, &wave));
    events.extend(engine.advance(400));

    // N13 peaks at twelve, N14 raises the max again while already peaking
    assert_eq!(engine.state().episode_max_density(), 13);
    assert_eq!(engine.state().state(), LifecycleState::PressurePeaking);

    let into = |state: LifecycleState| {
        transitions(&events)
            .into_iter()
            .filter(|(_, to)| *to == state)
            .count()
    };
    assert_eq!(into(LifecycleState::PressurePeaking), 2);
    assert_eq!(into(LifecycleState::ExhaustionDetected), 1);
    assert_eq!(signals(&events, SignalKind::Exhaustion).len(), 1);
}

#[test]
fn dissipation_then_reactivation_then_quiet() {
    let mut engine = IntelligenceEngine::new(&peak_config());
    drive_to_exhaustion(&mut engine);

    // no threshold activity for five minutes
    let collapsed = engine.advance(400);
    assert_eq!(
        transitions(&collapsed),
        vec![(LifecycleState::ExhaustionDetected, LifecycleState::Dissipation)]
    );

    let revived = engine.process(&buy("N2", dec!(12), 450)).unwrap();
    assert_eq!(
        transitions(&revived),
        vec![(LifecycleState::Dissipation, LifecycleState::Ignition)]
    );
    assert_eq!(engine.state().episode_id(), 1);

    let ended = engine.advance(1_050);
    assert_eq!(transitions(&ended), vec![(LifecycleState::Ignition, LifecycleState::Quiet)]);
    assert!(engine.state().early_wallets().is_empty());
    assert_eq!(engine.state().episode_max_density(), 0);
    assert!(!engine.state().is_episode_open());
}
