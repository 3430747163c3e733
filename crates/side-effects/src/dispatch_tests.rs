//! End-to-end dispatch behavior through the public API.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::{
    disable_side_effects, Arguments, Call, Consumer, Registry, Settings, SideEffectError,
    SideEffectMeta, Signature, UnitOfWork,
};

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// A consumer that appends `entry(call)` to `log`.
fn recorder<F>(name: &'static str, signature: Signature, log: &Log, entry: F) -> Consumer
where
    F: Fn(&Call) -> anyhow::Result<String> + Send + Sync + 'static,
{
    let log = Arc::clone(log);
    Consumer::new(name, signature, move |call| {
        let line = entry(call)?;
        log.lock().unwrap().push(line);
        Ok(())
    })
}

/// One captured tracing event: its level and its fields rendered as text.
#[derive(Debug, Clone)]
struct Captured {
    level: Level,
    fields: BTreeMap<String, String>,
}

#[derive(Default)]
struct Fields(BTreeMap<String, String>);

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

/// Layer that keeps every event it sees.
#[derive(Clone, Default)]
struct CaptureLayer(Arc<Mutex<Vec<Captured>>>);

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = Fields::default();
        event.record(&mut fields);
        self.0.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            fields: fields.0,
        });
    }
}

/// Run `f` with a thread-local subscriber and return what it logged.
fn capture_events<R>(f: impl FnOnce() -> R) -> (R, Vec<Captured>) {
    let layer = CaptureLayer::default();
    let events = Arc::clone(&layer.0);
    let subscriber = tracing_subscriber::registry().with(layer);
    let out = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (out, captured)
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_no_consumers_is_a_noop() {
    let registry = Registry::new();
    registry
        .dispatch("nobody:listens", &Arguments::new().arg(1).kwarg("x", 2), None)
        .unwrap();
}

#[test]
fn test_positional_arguments_are_bound() {
    let registry = Registry::new();
    let calls = log();
    registry
        .register(
            "x",
            recorder("tests::f", Signature::new().arg("a").arg("b"), &calls, |call| {
                Ok(format!("f({}, {})", call.get::<i32>("a")?, call.get::<i32>("b")?))
            }),
        )
        .unwrap();

    registry
        .dispatch("x", &Arguments::new().arg(1).arg(2), None)
        .unwrap();
    assert_eq!(*calls.lock().unwrap(), ["f(1, 2)"]);
}

#[test]
fn test_return_value_is_passed_when_declared() {
    let registry = Registry::new();
    let calls = log();
    registry
        .register(
            "x",
            recorder(
                "tests::g",
                Signature::new().arg("a").arg("b").arg("return_value"),
                &calls,
                |call| {
                    Ok(format!(
                        "g({}, {}, return_value={})",
                        call.get::<i32>("a")?,
                        call.get::<i32>("b")?,
                        call.get::<i32>("return_value")?
                    ))
                },
            ),
        )
        .unwrap();

    registry
        .dispatch("x", &Arguments::new().arg(1).arg(2), Some(crate::value(9)))
        .unwrap();
    assert_eq!(*calls.lock().unwrap(), ["g(1, 2, return_value=9)"]);
}

#[test]
fn test_return_value_is_passed_through_var_kwargs() {
    let registry = Registry::new();
    let calls = log();
    registry
        .register(
            "foo",
            recorder(
                "tests::has_return_value",
                Signature::new().var_args().var_kwargs(),
                &calls,
                |call| Ok(call.var_kwarg_names().collect::<Vec<_>>().join(",")),
            ),
        )
        .unwrap();

    registry.dispatch("foo", &Arguments::new(), None).unwrap();
    assert_eq!(*calls.lock().unwrap(), ["return_value"]);
}

#[test]
fn test_consumer_without_parameters_is_a_mismatch() {
    let registry = Registry::new();
    registry
        .register("x", Consumer::new("tests::h", Signature::new(), |_| Ok(())))
        .unwrap();

    let err = registry
        .dispatch("x", &Arguments::new().arg(1), None)
        .unwrap_err();
    match err {
        SideEffectError::SignatureMismatch { consumer, signature } => {
            assert_eq!(consumer, "tests::h");
            assert_eq!(signature, "()");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = registry
        .dispatch("x", &Arguments::new().kwarg("k", 1), None)
        .unwrap_err();
    assert!(matches!(err, SideEffectError::SignatureMismatch { .. }));
}

#[test]
fn test_consumer_without_parameters_runs_for_empty_dispatch() {
    let registry = Registry::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    registry
        .register(
            "x",
            Consumer::new("tests::h", Signature::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    registry.dispatch("x", &Arguments::new(), Some(crate::value(1))).unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_mismatch_runs_no_consumer() {
    let registry = Registry::new();
    let calls = log();
    registry
        .register(
            "x",
            recorder("tests::ok", Signature::new().arg("a"), &calls, |_| Ok("ok".into())),
        )
        .unwrap();
    registry
        .register("x", Consumer::new("tests::bad", Signature::new(), |_| Ok(())))
        .unwrap();

    let err = registry.dispatch("x", &Arguments::new().arg(1), None);
    assert!(matches!(err, Err(SideEffectError::SignatureMismatch { consumer, .. }) if consumer == "tests::bad"));
    assert!(calls.lock().unwrap().is_empty());
}

#[test]
fn test_shared_state_is_mutated() {
    let registry = Registry::new();
    registry
        .register(
            "e",
            Consumer::new("tests::record", Signature::new().arg("x"), |call| {
                call.get::<Log>("x")?.lock().unwrap().push("foo".to_string());
                Ok(())
            }),
        )
        .unwrap();

    let shared = log();
    registry
        .dispatch("e", &Arguments::new().arg(Arc::clone(&shared)), None)
        .unwrap();
    assert_eq!(*shared.lock().unwrap(), ["foo"]);
}

#[test]
fn test_consumers_run_in_registration_order() {
    let registry = Registry::new();
    let calls = log();
    for name in ["tests::third", "tests::first", "tests::second"] {
        registry
            .register(
                "order",
                recorder(name, Signature::new(), &calls, move |_| Ok(name.to_string())),
            )
            .unwrap();
    }
    registry.dispatch("order", &Arguments::new(), None).unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        ["tests::third", "tests::first", "tests::second"]
    );
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn test_meta_is_passed_when_declared_keyword_only() {
    let registry = Registry::new();
    let calls = log();

    registry
        .register(
            "a",
            recorder("tests::handler_a", Signature::new().with_meta(), &calls, |call| {
                let meta = call.meta().expect("meta");
                Ok(format!("a:{}", meta.label()))
            }),
        )
        .unwrap();
    registry
        .register(
            "b",
            recorder(
                "tests::handler_b",
                Signature::new().var_args().with_meta(),
                &calls,
                |call| {
                    let meta = call.meta().expect("meta");
                    assert_eq!(meta.args().positional().len(), call.var_args().len());
                    Ok(format!("b:{}:{}", meta.label(), call.var_args().len()))
                },
            ),
        )
        .unwrap();
    registry
        .register(
            "c",
            recorder(
                "tests::handler_c",
                Signature::new().with_meta().var_kwargs(),
                &calls,
                |call| {
                    let mut names: Vec<_> = call.var_kwarg_names().collect();
                    names.sort_unstable();
                    Ok(format!("c:{}:{}", call.meta().expect("meta").label(), names.join(",")))
                },
            ),
        )
        .unwrap();

    registry.dispatch("a", &Arguments::new(), None).unwrap();
    registry
        .dispatch("b", &Arguments::new().arg(1).arg(2).arg(3), None)
        .unwrap();
    registry
        .dispatch("c", &Arguments::new().kwarg("x", 1).kwarg("y", 2), None)
        .unwrap();

    // handler_c gets the metadata, not a bare return_value keyword.
    assert_eq!(*calls.lock().unwrap(), ["a:a", "b:b:3", "c:c:x,y"]);
}

#[test]
fn test_meta_carries_return_value() {
    let registry = Registry::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    registry
        .register(
            "a",
            Consumer::new("tests::meta", Signature::new().with_meta(), move |call| {
                let meta: &SideEffectMeta = call.meta().expect("meta");
                *sink.lock().unwrap() = meta.return_value::<u64>().copied();
                assert_eq!(call.return_value::<u64>(), Some(&5));
                Ok(())
            }),
        )
        .unwrap();

    registry
        .dispatch("a", &Arguments::new(), Some(crate::value(5u64)))
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), Some(5));
}

#[test]
fn test_meta_and_return_value_are_both_passed_when_declared() {
    let registry = Registry::new();
    let calls = log();
    registry
        .register(
            "x",
            recorder(
                "tests::both",
                Signature::new().arg("a").arg("return_value").with_meta(),
                &calls,
                |call| {
                    Ok(format!(
                        "both({}, return_value={}, label={})",
                        call.get::<i32>("a")?,
                        call.get::<i32>("return_value")?,
                        call.meta().expect("meta").label()
                    ))
                },
            ),
        )
        .unwrap();
    registry
        .register(
            "x",
            recorder("tests::plain", Signature::new().arg("a"), &calls, |call| {
                Ok(format!("plain({})", call.get::<i32>("a")?))
            }),
        )
        .unwrap();

    registry
        .dispatch("x", &Arguments::new().arg(1), Some(crate::value(9)))
        .unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        ["both(1, return_value=9, label=x)", "plain(1)"]
    );
}

#[test]
fn test_meta_must_be_keyword_only() {
    let registry = Registry::new();
    registry
        .register(
            "foo",
            Consumer::new(
                "tests::handler",
                Signature::new().arg("side_effect_meta").var_args().var_kwargs(),
                |_| Ok(()),
            ),
        )
        .unwrap();
    assert!(matches!(
        registry.dispatch("foo", &Arguments::new(), None),
        Err(SideEffectError::SignatureMismatch { .. })
    ));
}

#[test]
fn test_try_bind_all() {
    let registry = Registry::new();
    let sigs = [
        ("tests::foo1", Signature::new().arg("return_value")),
        ("tests::foo2", Signature::new().arg("arg1").arg("return_value")),
        ("tests::foo3", Signature::new().var_args().keyword_only("return_value")),
        ("tests::foo4", Signature::new().arg("return_value").var_kwargs()),
        ("tests::foo5", Signature::new().arg("arg1").var_kwargs()),
    ];
    for (name, sig) in sigs {
        registry
            .register("foo", Consumer::new(name, sig, |_| Ok(())))
            .unwrap();
    }

    registry.try_bind_all("foo", &Arguments::new().arg(1)).unwrap();
    assert!(matches!(
        registry.try_bind_all("foo", &Arguments::new().arg(1).arg(2)),
        Err(SideEffectError::SignatureMismatch { consumer, .. }) if consumer == "tests::foo1"
    ));
}

// ============================================================================
// Errors and settings
// ============================================================================

fn failing_registry(settings: Settings) -> (Registry, Arc<AtomicUsize>) {
    let registry = Registry::with_settings(settings);
    let after = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&after);
    registry
        .register(
            "foo",
            Consumer::new("tests::boom", Signature::new(), |_| anyhow::bail!("boom")),
        )
        .unwrap();
    registry
        .register(
            "foo",
            Consumer::new("tests::after", Signature::new(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    (registry, after)
}

#[test]
fn test_consumer_error_is_logged_and_skipped() {
    let (registry, after) = failing_registry(Settings::default());
    let (result, events) = capture_events(|| registry.dispatch("foo", &Arguments::new(), None));
    result.unwrap();
    assert_eq!(after.load(Ordering::SeqCst), 1);

    let errors: Vec<_> = events.iter().filter(|e| e.level == Level::ERROR).collect();
    assert_eq!(errors.len(), 1, "expected one error event, got {events:?}");
    assert_eq!(errors[0].fields["label"], "foo");
    assert_eq!(errors[0].fields["consumer"], "tests::boom");
    assert!(errors[0].fields["error"].contains("boom"));
}

#[test]
fn test_consumer_error_aborts_when_configured() {
    let (registry, after) = failing_registry(Settings {
        abort_on_error: true,
        ..Settings::default()
    });
    let err = registry.dispatch("foo", &Arguments::new(), None).unwrap_err();
    match err {
        SideEffectError::ConsumerFailed { label, consumer, source } => {
            assert_eq!(label, "foo");
            assert_eq!(consumer, "tests::boom");
            assert_eq!(source.to_string(), "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_test_mode_fail_raises_before_consumers() {
    let (registry, after) = failing_registry(Settings::default());
    registry.update_settings(|s| s.test_mode_fail = true);
    assert!(matches!(
        registry.dispatch("foo", &Arguments::new(), None),
        Err(SideEffectError::TestModeFail { label }) if label == "foo"
    ));
    assert!(matches!(
        registry.dispatch("unregistered", &Arguments::new(), None),
        Err(SideEffectError::TestModeFail { .. })
    ));
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_test_mode_suppresses_and_notifies() {
    let (registry, after) = failing_registry(Settings {
        test_mode: true,
        ..Settings::default()
    });
    let seen = log();
    let sink = Arc::clone(&seen);
    registry
        .suppressed_signal()
        .connect(move |label| sink.lock().unwrap().push(label.to_string()));

    registry.dispatch("foo", &Arguments::new(), None).unwrap();
    assert_eq!(*seen.lock().unwrap(), ["foo"]);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Suppression and deferral together
// ============================================================================

#[test]
fn test_suppressed_twice() {
    let (registry, after) = failing_registry(Settings::default());
    let guard = disable_side_effects(&registry);
    registry.dispatch("e", &Arguments::new(), None).unwrap();
    registry.dispatch("e", &Arguments::new(), None).unwrap();
    assert_eq!(guard.events().labels(), ["e", "e"]);
    assert_eq!(after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_deferred_dispatch_is_inspectable_and_rolled_back() {
    let registry = Arc::new(Registry::new());
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    registry
        .register(
            "foo",
            Consumer::new("tests::email", Signature::new().arg("to"), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();

    let uow = UnitOfWork::new();
    uow.begin();
    registry
        .dispatch_on_commit(
            &uow,
            "foo",
            Arguments::new().arg("to@example.com"),
            None,
        )
        .unwrap();

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(uow.pending(), ["foo"]);

    uow.rollback().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert!(uow.pending().is_empty());
}

#[test]
fn test_suppressed_dispatch_registers_no_commit_hook() {
    let registry = Arc::new(Registry::new());
    let uow = UnitOfWork::new();
    uow.begin();
    {
        let guard = disable_side_effects(&registry);
        registry
            .dispatch_on_commit(&uow, "foo", Arguments::new(), None)
            .unwrap();
        assert_eq!(guard.events().labels(), ["foo"]);
    }
    assert!(uow.pending().is_empty());
    uow.commit().unwrap();
}

#[test]
fn test_deferred_dispatches_run_in_order_on_commit() {
    let registry = Arc::new(Registry::new());
    let calls = log();
    for label in ["first", "second", "third"] {
        registry
            .register(
                label,
                recorder("tests::record", Signature::new(), &calls, move |call| {
                    Ok(call.label().to_string())
                }),
            )
            .unwrap();
    }

    let uow = UnitOfWork::new();
    uow.atomic(|| -> crate::Result<()> {
        for label in ["second", "first", "third"] {
            registry.dispatch_on_commit(&uow, label, Arguments::new(), None)?;
        }
        assert!(calls.lock().unwrap().is_empty());
        Ok(())
    })
    .unwrap();

    assert_eq!(*calls.lock().unwrap(), ["second", "first", "third"]);
}
