//! End-to-end runs of the built-in and table plans on a simulated rig.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{assert_duration_near, TestRig, Timeline, TimingTolerance};
use sidekick_daq::config::channels::{LED_BRIGHTNESS, SHUTTER_ENABLE};
use sidekick_daq::error::DaqError;
use sidekick_daq::experiment::{
    Action, ActionPlan, CancelToken, ExitStatus, PlanLoader, Reporter, RestState, Row, Template,
};
use sidekick_daq::hardware::ChannelValue;
use sidekick_daq::metadata::RunMetadataBuilder;

fn reporter_with(timeline: &Arc<Timeline>) -> Reporter {
    Reporter::new().with(timeline.clone())
}

#[tokio::test(start_paused = true)]
async fn smoke_test_timeline() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    let plan = PlanLoader::load_fixed(Template::SmokeTest).unwrap();

    let summary = rig
        .engine
        .run(plan, RunMetadataBuilder::new().build(), &reporter_with(&timeline))
        .await
        .unwrap();

    let observed: Vec<_> = timeline
        .steps()
        .into_iter()
        .map(|s| (s.at, s.channel, s.value))
        .collect();
    assert_eq!(
        observed,
        vec![
            (Duration::ZERO, LED_BRIGHTNESS.to_string(), ChannelValue::Float(128.0)),
            (Duration::from_millis(500), SHUTTER_ENABLE.to_string(), ChannelValue::Boolean(true)),
            (Duration::from_millis(1500), SHUTTER_ENABLE.to_string(), ChannelValue::Boolean(false)),
            (Duration::from_millis(1500), LED_BRIGHTNESS.to_string(), ChannelValue::Float(0.0)),
        ]
    );
    assert_eq!(summary.exit_status, ExitStatus::Success);
    assert_duration_near(
        summary.elapsed,
        Duration::from_millis(1500),
        TimingTolerance::Exact,
        "smoke test",
    );
    assert_eq!(rig.value(LED_BRIGHTNESS), ChannelValue::Float(0.0));
    assert_eq!(rig.value(SHUTTER_ENABLE), ChannelValue::Boolean(false));
}

#[tokio::test(start_paused = true)]
async fn sweep_applies_points_in_order_and_turns_led_off() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    let plan = PlanLoader::load_fixed(Template::LinearSweep {
        steps: 6,
        hold: Duration::ZERO,
    })
    .unwrap();

    rig.engine
        .run(plan, RunMetadataBuilder::new().build(), &reporter_with(&timeline))
        .await
        .unwrap();

    let values: Vec<f64> = timeline.steps().iter().map(|s| s.value.as_f64()).collect();
    assert_eq!(values, vec![0.0, 51.0, 102.0, 153.0, 204.0, 255.0]);

    let mut expected: Vec<_> = values.iter().map(|v| ChannelValue::Float(*v)).collect();
    expected.push(ChannelValue::Float(0.0));
    assert_eq!(rig.endpoint(LED_BRIGHTNESS).history(), expected);
}

#[tokio::test(start_paused = true)]
async fn reporter_sees_plan_verbatim() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    let rows: Vec<Row> = [("10", "0.25", "1"), ("200", "0", "0"), ("55.5", "2", "1")]
        .iter()
        .map(|(b, d, s)| {
            [("brightness", *b), ("duration", *d), ("shutter", *s)]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .collect();
    let plan = PlanLoader::load_from_table(rows).unwrap().plan;
    let expected: Vec<_> = plan
        .actions()
        .map(|a| (a.channel().to_string(), a.value(), a.hold_duration()))
        .collect();

    let summary = rig
        .engine
        .run(plan, RunMetadataBuilder::new().build(), &reporter_with(&timeline))
        .await
        .unwrap();

    assert_eq!(timeline.triples(), expected);
    assert_eq!(summary.steps_completed, 6);
    assert_eq!(summary.elapsed, Duration::from_millis(2250));
}

#[tokio::test(start_paused = true)]
async fn write_failure_reports_step_and_restores_rest_state() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    // Shutter opens, then the close at step 2 fails
    rig.endpoint(SHUTTER_ENABLE).fail_after(1);

    let plan = PlanLoader::load_fixed(Template::SmokeTest).unwrap();
    let err = rig
        .engine
        .run(plan, RunMetadataBuilder::new().build(), &reporter_with(&timeline))
        .await
        .unwrap_err();

    assert!(matches!(err, DaqError::RunFailed { step: 2, .. }));
    let summary = err.run_summary().unwrap();
    assert_eq!(summary.exit_status, ExitStatus::Failed);
    assert_eq!(summary.steps_completed, 2);
    assert_eq!(summary.steps_skipped, 1);
    assert_eq!(timeline.errors().len(), 1);

    // LED reached its rest value even though the shutter endpoint is down
    assert_eq!(rig.value(LED_BRIGHTNESS), ChannelValue::Float(0.0));
    assert!(summary.rest_state_errors.contains_key(SHUTTER_ENABLE));
}

#[tokio::test(start_paused = true)]
async fn unknown_channel_aborts_before_later_steps() {
    let rig = TestRig::new();
    let plan = ActionPlan::builder("typo")
        .action(Action::set(LED_BRIGHTNESS, 64.0).hold(Duration::from_secs(1)))
        .action(Action::set("led.ch9.brightness", 1.0))
        .action(Action::set(SHUTTER_ENABLE, true))
        .rest_state(RestState::new().with(LED_BRIGHTNESS, 0.0).with(SHUTTER_ENABLE, false))
        .build()
        .unwrap();

    let err = rig
        .engine
        .run(plan, RunMetadataBuilder::new().build(), &Reporter::new())
        .await
        .unwrap_err();

    let DaqError::RunFailed { step, source, .. } = err else {
        panic!("expected RunFailed, got {err:?}");
    };
    assert_eq!(step, 1);
    assert!(matches!(*source, DaqError::UnknownChannel(ref name) if name == "led.ch9.brightness"));
    assert!(rig.endpoint(SHUTTER_ENABLE).history() == vec![ChannelValue::Boolean(false)]);
    assert_eq!(rig.value(LED_BRIGHTNESS), ChannelValue::Float(0.0));
}

#[tokio::test(start_paused = true)]
async fn type_mismatch_aborts_and_restores_rest_state() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    let plan = ActionPlan::builder("bad_flag")
        .action(Action::set(LED_BRIGHTNESS, 200.0))
        .action(Action::set(SHUTTER_ENABLE, 2i64))
        .action(Action::set(LED_BRIGHTNESS, 100.0))
        .rest_state(RestState::new().with(LED_BRIGHTNESS, 0.0).with(SHUTTER_ENABLE, false))
        .build()
        .unwrap();

    let err = rig
        .engine
        .run(plan, RunMetadataBuilder::new().build(), &reporter_with(&timeline))
        .await
        .unwrap_err();

    let DaqError::RunFailed { step, source, summary } = err else {
        panic!("expected RunFailed, got {err:?}");
    };
    assert_eq!(step, 1);
    assert!(matches!(*source, DaqError::TypeMismatch { ref channel, .. } if channel == SHUTTER_ENABLE));
    assert_eq!(summary.steps_completed, 1);
    assert_eq!(summary.steps_skipped, 1);
    assert!(summary.rest_state_errors.is_empty());
    assert_eq!(timeline.steps().len(), 1);

    // The rejected value never reached the shutter; only the rest write did
    assert_eq!(rig.endpoint(SHUTTER_ENABLE).history(), vec![ChannelValue::Boolean(false)]);
    assert_eq!(
        rig.endpoint(LED_BRIGHTNESS).history(),
        vec![ChannelValue::Float(200.0), ChannelValue::Float(0.0)]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_run_is_distinct_from_success() {
    let rig = TestRig::new();
    let timeline = Arc::new(Timeline::default());
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(700)).await;
        trigger.cancel();
    });

    let plan = PlanLoader::load_fixed(Template::SmokeTest).unwrap();
    let summary = rig
        .engine
        .run_with_cancel(
            plan,
            RunMetadataBuilder::new().build(),
            &reporter_with(&timeline),
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(summary.exit_status, ExitStatus::Cancelled);
    assert_eq!(summary.steps_completed, 2);
    assert_eq!(summary.steps_skipped, 2);
    assert_eq!(timeline.finished().unwrap().exit_status, ExitStatus::Cancelled);
    // Shutter was open when cancel hit; rest state closed it
    assert_eq!(rig.value(SHUTTER_ENABLE), ChannelValue::Boolean(false));
    assert_eq!(rig.value(LED_BRIGHTNESS), ChannelValue::Float(0.0));
}

#[tokio::test(start_paused = true)]
async fn runs_on_one_engine_are_serialized() {
    let rig = Arc::new(TestRig::new());
    let first = {
        let rig = rig.clone();
        tokio::spawn(async move {
            let plan = PlanLoader::load_fixed(Template::SmokeTest).unwrap();
            rig.engine
                .run(plan, RunMetadataBuilder::new().build(), &Reporter::new())
                .await
        })
    };
    let second = {
        let rig = rig.clone();
        tokio::spawn(async move {
            let plan = PlanLoader::load_fixed(Template::SmokeTest).unwrap();
            rig.engine
                .run(plan, RunMetadataBuilder::new().build(), &Reporter::new())
                .await
        })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Two complete, non-interleaved smoke tests: open/close pairs never overlap
    let shutter: Vec<_> = rig
        .endpoint(SHUTTER_ENABLE)
        .history()
        .into_iter()
        .map(|v| v.as_f64())
        .collect();
    assert_eq!(shutter, vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
}
