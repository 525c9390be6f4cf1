//! Integration tests for the measurement session against simulated instruments.

use iv_sweep::data::SharedDataset;
use iv_sweep::error::IvError;
use iv_sweep::hardware::capabilities::MeterSettings;
use iv_sweep::hardware::mock::{MockBench, MockCircuit, MockCurrentSource, MockVoltageMeter};
use iv_sweep::sweep::{
    ChannelObserver, MeasurementSession, SessionEvent, SessionObserver, SessionOptions,
    SessionOrder, SessionRequest, SessionState, SweepPlan,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast_options() -> SessionOptions {
    SessionOptions {
        settle: Duration::ZERO,
        reset_hold: Duration::from_millis(1),
        meter: MeterSettings {
            sampling_interval_s: 0.0001,
            trigger_delay_s: 0.0,
            sample_count: 3,
        },
    }
}

/// Records every event plus whether both instruments were safe when the
/// terminal notification arrived.
struct SafetyRecorder {
    source: Arc<MockCurrentSource>,
    meter: Arc<MockVoltageMeter>,
    events: Mutex<Vec<SessionEvent>>,
    safe_at_end: Mutex<Option<bool>>,
}

impl SafetyRecorder {
    fn new(source: Arc<MockCurrentSource>, meter: Arc<MockVoltageMeter>) -> Self {
        Self {
            source,
            meter,
            events: Mutex::new(Vec::new()),
            safe_at_end: Mutex::new(None),
        }
    }

    fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionObserver for SafetyRecorder {
    fn notify(&self, event: &SessionEvent) {
        if matches!(
            event,
            SessionEvent::SessionCompleted
                | SessionEvent::SessionAborted
                | SessionEvent::SessionFailed { .. }
        ) {
            let safe = self.source.snapshot().is_safe() && self.meter.snapshot().is_safe();
            *self.safe_at_end.lock().unwrap() = Some(safe);
        }
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test]
async fn completed_sweep_fills_dataset_in_order() {
    let bench = MockBench::new(100.0);
    let recorder = Arc::new(SafetyRecorder::new(bench.source.clone(), bench.meter.clone()));
    let dataset = SharedDataset::new();
    let request = SessionRequest::new(
        SessionOrder::measure(0.01, 0.001),
        bench.source.clone(),
        bench.meter.clone(),
    );

    let (session, _signals) =
        MeasurementSession::new(request, dataset.clone(), recorder.clone(), fast_options()).unwrap();
    let outcome = session.run().await;

    let plan = SweepPlan::new(0.01, 0.001).unwrap();
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(outcome.points_measured, plan.len());
    assert_eq!(outcome.mismatches, 0);

    let snapshot = dataset.snapshot().await;
    assert_eq!(snapshot.len(), plan.len());
    assert_eq!(snapshot.currents(), plan.points());
    for (i, v) in snapshot.currents().iter().zip(snapshot.voltages()) {
        assert!((v - 100.0 * i).abs() < 1e-12);
    }

    // The meter was triggered only after the source reached each set point
    assert_eq!(bench.meter.snapshot().triggered_at, plan.points());

    let events = recorder.events();
    let sized_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::DatasetSized { len } if *len == plan.len()))
        .unwrap();
    let indices: Vec<usize> = events
        .iter()
        .enumerate()
        .filter_map(|(pos, e)| match e {
            SessionEvent::PointUpdated { point } => {
                assert!(pos > sized_at);
                Some(point.index)
            }
            _ => None,
        })
        .collect();
    assert_eq!(indices, (0..plan.len()).collect::<Vec<_>>());
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::DisplayTick))
            .count(),
        plan.len()
    );
    assert_eq!(events.last(), Some(&SessionEvent::SessionCompleted));
    assert_eq!(*recorder.safe_at_end.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn source_failure_fails_session_after_shutdown() {
    let circuit = Arc::new(MockCircuit::new(100.0));
    let source = Arc::new(MockCurrentSource::new(circuit.clone()).fail_on_start(3));
    let meter = Arc::new(MockVoltageMeter::new(circuit));
    let recorder = Arc::new(SafetyRecorder::new(source.clone(), meter.clone()));
    let request = SessionRequest::new(
        SessionOrder::measure(0.01, 0.001),
        source.clone(),
        meter.clone(),
    );

    let (session, signals) =
        MeasurementSession::new(request, SharedDataset::new(), recorder.clone(), fast_options())
            .unwrap();
    let outcome = session.run().await;

    assert_eq!(outcome.state, SessionState::Failed);
    assert_eq!(outcome.points_measured, 3);
    assert!(matches!(outcome.error, Some(IvError::InstrumentIo(_))));
    assert_eq!(signals.state(), SessionState::Failed);
    assert!(matches!(
        recorder.events().last(),
        Some(SessionEvent::SessionFailed { .. })
    ));
    assert_eq!(*recorder.safe_at_end.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn meter_failure_fails_session() {
    let circuit = Arc::new(MockCircuit::new(100.0));
    let source = Arc::new(MockCurrentSource::new(circuit.clone()));
    let meter = Arc::new(MockVoltageMeter::new(circuit).fail_on_read(0));
    let request = SessionRequest::new(
        SessionOrder::measure(0.01, 0.005),
        source.clone(),
        meter.clone(),
    );

    let (session, _signals) = MeasurementSession::new(
        request,
        SharedDataset::new(),
        Arc::new(ChannelObserver::new().0),
        fast_options(),
    )
    .unwrap();
    let outcome = session.run().await;

    assert_eq!(outcome.state, SessionState::Failed);
    assert_eq!(outcome.points_measured, 0);
    assert!(source.snapshot().is_safe());
    assert!(meter.snapshot().is_safe());
}

#[tokio::test]
async fn readback_mismatch_is_recorded_not_fatal() {
    let circuit = Arc::new(MockCircuit::new(100.0));
    let source = Arc::new(MockCurrentSource::new(circuit.clone()).with_readback_error(0.02));
    let meter = Arc::new(MockVoltageMeter::new(circuit));
    let (observer, mut rx) = ChannelObserver::new();
    let request = SessionRequest::new(SessionOrder::measure(0.002, 0.001), source, meter);

    let (session, _signals) =
        MeasurementSession::new(request, SharedDataset::new(), Arc::new(observer), fast_options())
            .unwrap();
    let outcome = session.run().await;

    // Plan: 0, 1, 2, 2, 1, 0, -0, -1, -2, -2, -1, -0 mA; zero levels always match
    assert!(outcome.is_success());
    assert_eq!(outcome.points_measured, 12);
    assert_eq!(outcome.mismatches, 8);

    let mut mismatch_indices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SessionEvent::SetPointMismatch {
            index,
            commanded,
            readback,
        } = event
        {
            assert!((readback - commanded * 1.02).abs() < 1e-15);
            mismatch_indices.push(index);
        }
    }
    assert_eq!(mismatch_indices, vec![1, 2, 3, 4, 7, 8, 9, 10]);
}

#[tokio::test]
async fn caller_meter_timing_overrides_default() {
    let bench = MockBench::new(50.0);
    let order = SessionOrder::Measure {
        imax: 0.001,
        di: 0.001,
        meter: Some(MeterSettings {
            sampling_interval_s: 0.0001,
            trigger_delay_s: 0.0,
            sample_count: 1,
        }),
    };
    let dataset = SharedDataset::new();
    let request = SessionRequest::new(order, bench.source.clone(), bench.meter.clone());

    let (session, _signals) = MeasurementSession::new(
        request,
        dataset.clone(),
        Arc::new(ChannelObserver::new().0),
        fast_options(),
    )
    .unwrap();
    assert!(session.run().await.is_success());

    // Single-sample bursts report zero spread
    let snapshot = dataset.snapshot().await;
    assert!(snapshot.voltage_stds().iter().all(|s| *s == 0.0));
    assert_eq!(snapshot.len(), 8);
}

#[tokio::test]
async fn uneven_step_sweep_commands_evenly_spaced_points() {
    let bench = MockBench::new(100.0);
    let dataset = SharedDataset::new();
    let request = SessionRequest::new(
        SessionOrder::measure(0.01, 0.003),
        bench.source.clone(),
        bench.meter.clone(),
    );

    let (session, _signals) = MeasurementSession::new(
        request,
        dataset.clone(),
        Arc::new(ChannelObserver::new().0),
        fast_options(),
    )
    .unwrap();
    let outcome = session.run().await;

    let plan = SweepPlan::new(0.01, 0.003).unwrap();
    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(outcome.points_measured, 16);

    let commanded = bench.source.snapshot().commanded;
    assert_eq!(commanded, plan.points());
    assert_eq!(commanded[3], 0.01);
    assert_eq!(commanded[11], -0.01);
    for pair in commanded[..4].windows(2) {
        assert!((pair[1] - pair[0] - 0.01 / 3.0).abs() < 1e-15);
    }
    assert_eq!(dataset.snapshot().await.currents(), plan.points());
}

#[tokio::test]
async fn oversized_sweep_rejected_before_instruments_are_touched() {
    let bench = MockBench::new(100.0);
    let request = SessionRequest::new(
        SessionOrder::measure(1.0, 1e-300),
        bench.source.clone(),
        bench.meter.clone(),
    );

    let result = MeasurementSession::new(
        request,
        SharedDataset::new(),
        Arc::new(ChannelObserver::new().0),
        fast_options(),
    );

    assert!(matches!(result, Err(IvError::Validation(_))));
    let source = bench.source.snapshot();
    assert!(source.commanded.is_empty());
    assert_eq!(source.reset_count, 0);
    assert!(!source.output_enabled);
    assert!(source.settings.is_none());
    assert!(bench.meter.snapshot().settings.is_none());
}
