use std::sync::{Arc, Barrier};
use std::thread;

use safeguard::{
    ActivatePanicPayload, Entitlement, LocationPayload, Operation, Principal, RecordingGateway,
    SafeguardConfig, SafeguardEngine, SubjectId,
};

fn race<F>(engine: &Arc<SafeguardEngine>, principal: &Principal, op: F) -> (usize, usize)
where
    F: Fn() -> Operation + Send + Sync + Copy + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(engine);
            let principal = principal.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.execute(&principal, op())
            })
        })
        .collect();

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.join().unwrap() {
            Ok(_) => ok += 1,
            Err(e) if e.is_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    (ok, conflicts)
}

fn activate() -> Operation {
    Operation::ActivatePanic(ActivatePanicPayload {
        location: LocationPayload::new(6.5244, 3.3792),
        category: None,
    })
}

fn start_escort() -> Operation {
    Operation::StartEscort(LocationPayload::new(6.5244, 3.3792))
}

#[test]
fn concurrent_panic_activations_yield_one_winner() {
    let engine = Arc::new(SafeguardEngine::in_memory(
        Arc::new(RecordingGateway::new()),
        SafeguardConfig::default(),
    ));

    for _ in 0..200 {
        let civil = Principal::civil(SubjectId::new());
        assert_eq!(race(&engine, &civil, activate), (1, 1));

        let active = engine.panics().active(civil.subject_id()).unwrap();
        assert!(active.is_some());
        assert_eq!(engine.panics().history(civil.subject_id()).unwrap().len(), 1);
    }
}

#[test]
fn concurrent_escort_starts_yield_one_winner() {
    let engine = Arc::new(SafeguardEngine::in_memory(
        Arc::new(RecordingGateway::new()),
        SafeguardConfig::default(),
    ));

    for _ in 0..200 {
        let civil = Principal::civil(SubjectId::new()).with_entitlement(Entitlement::Escort);
        assert_eq!(race(&engine, &civil, start_escort), (1, 1));
        assert_eq!(engine.escorts().history(civil.subject_id()).unwrap().len(), 1);
    }
}

#[test]
fn panic_and_escort_slots_are_independent() {
    let engine = SafeguardEngine::in_memory(Arc::new(RecordingGateway::new()), SafeguardConfig::default());
    let civil = Principal::civil(SubjectId::new()).with_entitlement(Entitlement::Escort);

    engine.execute(&civil, activate()).unwrap();
    engine.execute(&civil, start_escort()).unwrap();
    assert!(engine.execute(&civil, activate()).unwrap_err().is_conflict());
    assert!(engine.execute(&civil, start_escort()).unwrap_err().is_conflict());
}

fn log_panic(lat: f64) -> Operation {
    Operation::LogPanicLocation(LocationPayload::new(lat, 3.3792))
}

#[test]
fn trail_appends_keep_issue_order_under_interleaving() {
    const APPENDS: u32 = 200;

    let engine = Arc::new(SafeguardEngine::in_memory(
        Arc::new(RecordingGateway::new()),
        SafeguardConfig::default(),
    ));
    let tracked = Principal::civil(SubjectId::new());
    let others: Vec<Principal> = (0..4).map(|_| Principal::civil(SubjectId::new())).collect();
    for p in std::iter::once(&tracked).chain(&others) {
        engine.execute(p, activate()).unwrap();
    }

    let barrier = Arc::new(Barrier::new(others.len() + 1));
    let mut handles = Vec::new();
    for p in others.iter().chain(std::iter::once(&tracked)) {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let p = p.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 1..=APPENDS {
                engine.execute(&p, log_panic(6.0 + f64::from(i) * 0.001)).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for p in std::iter::once(&tracked).chain(&others) {
        let event = engine.panics().active(p.subject_id()).unwrap().unwrap();
        assert_eq!(event.trail.len(), APPENDS as usize + 1);
        let lats: Vec<f64> = event.trail[1..].iter().map(|f| f.point.latitude()).collect();
        assert!(
            lats.windows(2).all(|w| w[0] < w[1]),
            "trail of {} is out of order",
            p.subject_id()
        );
    }
}
