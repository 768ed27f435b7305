//! Integration tests for the rcgc runtime through its public API.
//!
//! These tests drive counts, cycle collection and teardown the way an
//! embedding host would, including hosts that release more than they own.

use rcgc::api::{
    js_adopt_value, js_create_from_ctor, js_decrement_refcount, js_dup_value, js_free_context,
    js_free_runtime, js_free_value, js_get_global_object, js_get_refcount, js_is_live_object,
    js_new_context, js_new_object, js_new_runtime, js_new_string, js_run_gc, js_set_property_str,
};
use rcgc::context::{ContextConfig, ContextId};
use rcgc::enums::{ContextState, JSObjectClass};
use rcgc::external::ExternalOwnership;
use rcgc::jsvalue::{JS_UNDEFINED, JSValue};
use rcgc::runtime::{JSRuntime, RuntimeConfig};
use rcgc::teardown::{
    AnomalyCause, AnomalyDetail, TeardownCause, TeardownDecision, teardown_decision,
};
use std::sync::atomic::{AtomicUsize, Ordering};

fn new_runtime() -> (JSRuntime, ContextId) {
    let mut rt = js_new_runtime(RuntimeConfig::default());
    let ctx = js_new_context(&mut rt, ContextConfig::default()).expect("context init");
    (rt, ctx)
}

// ---------------------------------------------------------------------------
// Reference counts
// ---------------------------------------------------------------------------

#[test]
fn test_count_tracks_increments_and_decrements() {
    let (mut rt, _ctx) = new_runtime();
    for (n, m) in [(0, 0), (1, 0), (3, 3), (10, 4), (64, 63)] {
        let val = js_new_string(&mut rt, "counted");
        for _ in 0..n {
            js_dup_value(&rt, val);
        }
        for _ in 0..m {
            js_free_value(&mut rt, val);
        }
        assert_eq!(js_get_refcount(&rt, val), 1 + n - m);
        assert!(js_get_refcount(&rt, val) > 0);
        for _ in 0..(1 + n - m) {
            js_free_value(&mut rt, val);
        }
        assert!(!js_is_live_object(&rt, val));
    }
}

#[test]
fn test_forced_decrement_frees_once_then_goes_negative() {
    let (mut rt, _ctx) = new_runtime();
    let val = js_new_string(&mut rt, "once");
    assert_eq!(js_decrement_refcount(&mut rt, val), 0);
    assert!(!js_is_live_object(&rt, val));
    assert_eq!(rt.parked_objects(), 1);

    assert_eq!(js_decrement_refcount(&mut rt, val), -1);
    assert_eq!(js_get_refcount(&rt, val), -1);
    assert_eq!(rt.parked_objects(), 1);

    let report = js_free_runtime(rt);
    assert!(report.is_clean());
    assert_eq!(report.zombies_reclaimed, 1);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.cause == AnomalyCause::HostOverRelease));
}

#[test]
fn test_ordinary_free_at_zero_is_trapped() {
    let (mut rt, _ctx) = new_runtime();
    let val = js_new_string(&mut rt, "twice");
    js_adopt_value(&mut rt, val);
    js_decrement_refcount(&mut rt, val);
    js_free_value(&mut rt, val);
    assert!(!js_is_live_object(&rt, val));
    js_free_value(&mut rt, val);
    assert_eq!(js_get_refcount(&rt, val), 0);
    assert!(rt.diagnostics().iter().any(|d| matches!(
        d.detail,
        AnomalyDetail::ReleaseAtZero { ref_count: 0, .. }
    )));
}

// ---------------------------------------------------------------------------
// Cycle collection
// ---------------------------------------------------------------------------

fn make_cycle(rt: &mut JSRuntime, ctx: ContextId) -> (JSValue, JSValue) {
    let a = js_new_object(rt, ctx);
    let b = js_new_object(rt, ctx);
    let b_ref = js_dup_value(rt, b);
    assert!(js_set_property_str(rt, a, "b", b_ref));
    let a_ref = js_dup_value(rt, a);
    assert!(js_set_property_str(rt, b, "a", a_ref));
    (a, b)
}

#[test]
fn test_unreferenced_cycle_is_reclaimed_in_one_pass() {
    let (mut rt, ctx) = new_runtime();
    let baseline = rt.live_objects();
    let (a, b) = make_cycle(&mut rt, ctx);
    js_free_value(&mut rt, a);
    js_free_value(&mut rt, b);
    assert_eq!(rt.live_objects(), baseline + 2);

    assert_eq!(js_run_gc(&mut rt), 2);
    assert_eq!(rt.live_objects(), baseline);
    assert!(!js_is_live_object(&rt, a));
    assert!(!js_is_live_object(&rt, b));
}

#[test]
fn test_cycle_survives_while_member_is_adopted() {
    let (mut rt, ctx) = new_runtime();
    let (a, b) = make_cycle(&mut rt, ctx);
    let token = rt.adopt(b);
    js_free_value(&mut rt, a);
    js_free_value(&mut rt, b);

    assert_eq!(js_run_gc(&mut rt), 0);
    assert!(js_is_live_object(&rt, a));
    assert!(js_is_live_object(&rt, b));
    assert_eq!(rt.inspect(a), 1);
    assert_eq!(rt.inspect(b), 2);

    assert_eq!(rt.release(token), 1);
    assert_eq!(js_run_gc(&mut rt), 2);
    assert!(!js_is_live_object(&rt, a));
}

#[test]
fn test_dead_cycle_referencing_over_released_object_is_tolerated() {
    let (mut rt, ctx) = new_runtime();
    let (a, b) = make_cycle(&mut rt, ctx);
    let leaf = js_new_string(&mut rt, "leaf");
    let leaf_ref = js_dup_value(&rt, leaf);
    assert!(js_set_property_str(&mut rt, a, "leaf", leaf_ref));

    // The host releases both references, including the one `a` owns.
    assert_eq!(js_decrement_refcount(&mut rt, leaf), 1);
    assert_eq!(js_decrement_refcount(&mut rt, leaf), 0);
    assert!(!js_is_live_object(&rt, leaf));
    assert_eq!(rt.parked_objects(), 1);

    js_free_value(&mut rt, a);
    js_free_value(&mut rt, b);
    assert_eq!(js_run_gc(&mut rt), 2);
    assert_eq!(js_get_refcount(&rt, leaf), 0);
    assert!(rt.diagnostics().iter().any(|d| matches!(
        d.detail,
        AnomalyDetail::ReleaseAtZero { ref_count: 0, .. }
    ) && d.cause == AnomalyCause::HostOverRelease));

    js_free_context(&mut rt, ctx);
    let report = js_free_runtime(rt);
    assert!(report.is_clean());
    assert_eq!(report.zombies_reclaimed, 1);
}

#[test]
fn test_opportunistic_collection_reclaims_garbage_cycles() {
    let mut rt = JSRuntime::new(RuntimeConfig {
        gc_threshold: 16,
        ..RuntimeConfig::default()
    });
    let ctx = rt.new_context(ContextConfig::default()).expect("context");
    for _ in 0..100 {
        let (a, b) = make_cycle(&mut rt, ctx);
        js_free_value(&mut rt, a);
        js_free_value(&mut rt, b);
    }
    assert!(rt.live_objects() < 64);
}

// ---------------------------------------------------------------------------
// Context teardown
// ---------------------------------------------------------------------------

#[test]
fn test_context_teardown_at_zero_proceeds() {
    let (mut rt, ctx) = new_runtime();
    assert_eq!(js_free_context(&mut rt, ctx), TeardownDecision::Proceed);
    assert_eq!(rt.context_state(ctx), Some(ContextState::Freed));
    assert!(js_get_global_object(&rt, ctx).is_exception());
}

#[test]
fn test_context_teardown_below_zero_proceeds_and_blames_host() {
    let ctx = ContextId::from_index(3);
    let decision = teardown_decision(ctx, -1, TeardownCause::Release);
    assert!(decision.proceeds());
    let TeardownDecision::TolerateAndLog(diag) = decision else {
        panic!("expected a tolerated anomaly");
    };
    assert_eq!(diag.cause, AnomalyCause::HostOverRelease);
}

#[test]
fn test_positive_context_count_defers_release_but_not_shutdown() {
    let (mut rt, ctx) = new_runtime();
    rt.dup_context(ctx);
    assert_eq!(js_free_context(&mut rt, ctx), TeardownDecision::Defer);
    assert_eq!(rt.context_state(ctx), Some(ContextState::Active));

    let report = rt.shutdown();
    assert_eq!(report.contexts_closed, 1);
    assert!(report.is_clean());
    assert_eq!(rt.context_state(ctx), Some(ContextState::Freed));
}

#[test]
fn test_over_released_property_value_is_tolerated_at_teardown() {
    let (mut rt, ctx) = new_runtime();
    let global = js_get_global_object(&rt, ctx);
    let obj = js_new_object(&mut rt, ctx);
    let held = js_dup_value(&rt, obj);
    assert!(js_set_property_str(&mut rt, global, "held", held));
    js_free_value(&mut rt, global);
    js_free_value(&mut rt, obj);

    // The global still holds its reference; the host takes it anyway.
    assert_eq!(js_decrement_refcount(&mut rt, obj), 0);
    assert!(!js_is_live_object(&rt, obj));

    assert_eq!(js_free_context(&mut rt, ctx), TeardownDecision::Proceed);
    let report = js_free_runtime(rt);
    assert!(report.is_clean());
    assert!(report.diagnostics.iter().any(|d| matches!(
        d.detail,
        AnomalyDetail::ReleaseAtZero { .. }
    ) && d.cause == AnomalyCause::HostOverRelease));
}

// ---------------------------------------------------------------------------
// Runtime shutdown
// ---------------------------------------------------------------------------

#[test]
fn test_shutdown_without_adoption_is_clean() {
    let (mut rt, ctx) = new_runtime();
    let obj = js_new_object(&mut rt, ctx);
    let s = js_new_string(&mut rt, "value");
    assert!(js_set_property_str(&mut rt, obj, "s", s));
    js_free_value(&mut rt, obj);
    js_free_context(&mut rt, ctx);

    let report = js_free_runtime(rt);
    assert!(report.is_clean());
    assert!(report.diagnostics.is_empty());
    assert_eq!(report.zombies_reclaimed, 0);
}

#[test]
fn test_shutdown_with_adopted_object_reports_it() {
    let (mut rt, ctx) = new_runtime();
    let obj = js_new_object(&mut rt, ctx);
    rt.adopt_extra_reference(obj);
    js_free_value(&mut rt, obj);
    assert!(js_is_live_object(&rt, obj));

    // The adopted object keeps its prototype alive past context teardown.
    let report = js_free_runtime(rt);
    assert_eq!(report.contexts_closed, 1);
    assert_eq!(report.residual.len(), 2);
    let adopted: Vec<_> = report
        .residual
        .iter()
        .filter(|obj| obj.externally_adopted)
        .collect();
    assert_eq!(adopted.len(), 1);
    assert_eq!(adopted[0].ref_count, 1);
    let diag = report
        .diagnostics
        .iter()
        .find(|d| d.cause == AnomalyCause::ExternalHold)
        .expect("residual diagnostic");
    assert_eq!(
        diag.detail,
        AnomalyDetail::ResidualObjects {
            count: 2,
            externally_adopted: 1
        }
    );
}

#[test]
fn test_shutdown_runs_finalizers_for_residual_objects() {
    static FINALIZED: AtomicUsize = AtomicUsize::new(0);
    fn finalize(_opaque: *mut std::ffi::c_void) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    let mut rt = JSRuntime::default();
    let class_id = JSObjectClass::User as u8;
    rt.set_class_finalizer(class_id, Some(finalize)).expect("user class");
    let obj = rt
        .new_user_object(JS_UNDEFINED, class_id, std::ptr::null_mut())
        .expect("alloc");
    rt.adopt_extra_reference(obj);
    let report = rt.shutdown();
    assert_eq!(report.residual.len(), 1);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_shuts_down_without_explicit_call() {
    static FINALIZED: AtomicUsize = AtomicUsize::new(0);
    fn finalize(_opaque: *mut std::ffi::c_void) {
        FINALIZED.fetch_add(1, Ordering::SeqCst);
    }

    let (mut rt, _ctx) = new_runtime();
    let class_id = JSObjectClass::User as u8;
    rt.set_class_finalizer(class_id, Some(finalize)).expect("user class");
    let obj = rt
        .new_user_object(JS_UNDEFINED, class_id, std::ptr::null_mut())
        .expect("alloc");
    rt.adopt_extra_reference(obj);
    js_free_value(&mut rt, obj);
    assert!(js_is_live_object(&rt, obj));
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 0);

    drop(rt);
    assert_eq!(FINALIZED.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// End-to-end host scenario
// ---------------------------------------------------------------------------

#[test]
fn test_host_adopts_engine_drops_host_releases() {
    let (mut rt, ctx) = new_runtime();
    let ctor = rt.new_function("Widget", JS_UNDEFINED).expect("ctor");
    let widget = js_create_from_ctor(&mut rt, ctx, ctor, JSObjectClass::Object as u8);
    assert!(!widget.is_exception());

    // Host takes its own reference.
    let token = rt.adopt(widget);
    assert_eq!(js_get_refcount(&rt, widget), 2);

    // Engine drops its reference; the host keeps the object alive.
    js_free_value(&mut rt, widget);
    assert!(js_is_live_object(&rt, widget));
    assert_eq!(js_run_gc(&mut rt), 0);
    assert!(js_is_live_object(&rt, widget));

    // Host releases; the object goes away.
    assert_eq!(rt.release(token), 0);
    assert!(!js_is_live_object(&rt, widget));

    js_free_value(&mut rt, ctor);
    js_free_context(&mut rt, ctx);
    let report = js_free_runtime(rt);
    assert!(report.is_clean());
    assert_eq!(report.zombies_reclaimed, 1);
}
