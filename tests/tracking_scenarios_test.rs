//! End-to-end tracking scenarios: detection in, wire bytes out

use std::sync::Arc;
use std::time::{Duration, Instant};
use turret_control::adapters::{MockSerialBackend, PortInfo};
use turret_control::config::TurretConfig;
use turret_control::controller::{Controller, FrameOutcome};
use turret_control::dispatch::DeliveryOutcome;
use turret_control::link::LinkManager;
use turret_control::tracking::{DetectionBox, Offset, SelectionPolicy, TargetPoint};

fn tracking_controller(config: TurretConfig) -> (MockSerialBackend, Controller) {
    let backend = MockSerialBackend::with_ports(vec![PortInfo::named("/dev/ttyACM0")]);
    let link = LinkManager::new(config.link.clone(), Arc::new(backend.clone()));
    (backend, Controller::new(&config, Arc::new(link)))
}

fn test_config() -> TurretConfig {
    let mut config = TurretConfig::default();
    config.link.settle_delay = Duration::ZERO;
    config.tracking.auto_track = true;
    config
}

/// Box of size 20x20 centered on (cx, cy)
fn centered_at(cx: i32, cy: i32) -> DetectionBox {
    DetectionBox::new(cx - 10, cy - 10, 20, 20)
}

#[tokio::test]
async fn test_far_detection_moves_right_then_down() {
    let (backend, controller) = tracking_controller(test_config());
    controller.set_target(320, 180).await.unwrap();

    let outcome = controller
        .evaluate_frame(&[centered_at(400, 300)], Instant::now())
        .await;

    assert_eq!(
        outcome,
        FrameOutcome::Evaluated {
            offset: Offset::new(80, 120),
            outcome: DeliveryOutcome::Sent
        }
    );
    assert_eq!(backend.wire_bytes(), b"RIGHT\nDOWN\n");
}

#[tokio::test]
async fn test_near_detection_sends_nothing() {
    let (backend, controller) = tracking_controller(test_config());
    controller.set_target(320, 180).await.unwrap();

    let outcome = controller
        .evaluate_frame(&[centered_at(325, 185)], Instant::now())
        .await;

    assert_eq!(
        outcome,
        FrameOutcome::Evaluated {
            offset: Offset::new(5, 5),
            outcome: DeliveryOutcome::DroppedDeadZone
        }
    );
    assert!(backend.wire_bytes().is_empty());
    assert_eq!(controller.dispatch_state().await.last_command_time(), None);
}

#[tokio::test]
async fn test_every_center_inside_dead_zone_is_silent() {
    let (backend, controller) = tracking_controller(test_config());
    let target = controller.target().await;
    let t0 = Instant::now();

    for (i, dx) in (-15..=15).step_by(5).enumerate() {
        for dy in [-15, -7, 0, 7, 15] {
            let now = t0 + Duration::from_secs(i as u64 + 1);
            controller
                .evaluate_frame(&[centered_at(target.x + dx, target.y + dy)], now)
                .await;
        }
    }

    assert!(backend.wire_bytes().is_empty());
}

#[tokio::test]
async fn test_second_offset_within_interval_is_suppressed() {
    let (backend, controller) = tracking_controller(test_config());
    controller.set_target(320, 180).await.unwrap();
    let t0 = Instant::now();

    let first = controller
        .evaluate_frame(&[centered_at(400, 180)], t0)
        .await;
    let stamp = controller.dispatch_state().await.last_command_time();

    let second = controller
        .evaluate_frame(&[centered_at(400, 180)], t0 + Duration::from_millis(50))
        .await;

    assert!(matches!(
        first,
        FrameOutcome::Evaluated {
            outcome: DeliveryOutcome::Sent,
            ..
        }
    ));
    assert!(matches!(
        second,
        FrameOutcome::Evaluated {
            outcome: DeliveryOutcome::DroppedRateLimited,
            ..
        }
    ));
    assert_eq!(stamp, Some(t0));
    assert_eq!(controller.dispatch_state().await.last_command_time(), Some(t0));
    assert_eq!(backend.written_lines(), vec!["RIGHT"]);
}

#[tokio::test]
async fn test_at_most_one_batch_per_interval() {
    let (backend, controller) = tracking_controller(test_config());
    let t0 = Instant::now();

    // 30 fps worth of far-off detections for one second
    let mut batches = 0;
    for frame in 0..30u64 {
        let now = t0 + Duration::from_millis(frame * 33);
        let outcome = controller.evaluate_frame(&[centered_at(50, 50)], now).await;
        if let FrameOutcome::Evaluated {
            outcome: DeliveryOutcome::Sent,
            ..
        } = outcome
        {
            batches += 1;
        }
    }

    // frames at 0, 231, 462, 693, 924 ms clear the 200 ms gate
    assert_eq!(batches, 5);
    assert_eq!(backend.written_lines().len(), 10);
    assert!(backend
        .written_lines()
        .iter()
        .all(|l| l == "LEFT" || l == "UP"));
}

#[tokio::test]
async fn test_set_target_is_idempotent() {
    let (_backend, controller) = tracking_controller(test_config());
    controller
        .evaluate_frame(&[centered_at(100, 100)], Instant::now())
        .await;

    let dispatch_before = controller.dispatch_state().await;
    let link_before = controller.link().status().await;

    let first = controller.set_target(500, 400).await.unwrap();
    let second = controller.set_target(500, 400).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(controller.target().await, TargetPoint::new(500, 400));
    assert_eq!(controller.dispatch_state().await, dispatch_before);
    assert_eq!(controller.link().status().await, link_before);
}

#[tokio::test]
async fn test_largest_selection_policy() {
    let mut config = test_config();
    config.tracking.selection = SelectionPolicy::Largest;
    let (backend, controller) = tracking_controller(config);
    controller.set_target(640, 360).await.unwrap();

    // Small face to the left, large face to the right
    let detections = [
        DetectionBox::new(100, 350, 20, 20),
        DetectionBox::new(900, 300, 120, 120),
    ];
    controller.evaluate_frame(&detections, Instant::now()).await;

    assert_eq!(backend.written_lines(), vec!["RIGHT"]);
}

#[tokio::test]
async fn test_direct_commands_bypass_rate_limit() {
    let (backend, controller) = tracking_controller(test_config());

    controller
        .evaluate_frame(&[centered_at(50, 360)], Instant::now())
        .await;
    let stamp = controller.dispatch_state().await.last_command_time();

    assert_eq!(
        controller.issue_direct_command("FIRE").await.unwrap(),
        DeliveryOutcome::Sent
    );
    assert_eq!(
        controller.issue_direct_command("FIRE").await.unwrap(),
        DeliveryOutcome::Sent
    );

    assert_eq!(backend.written_lines(), vec!["LEFT", "FIRE", "FIRE"]);
    assert_eq!(controller.dispatch_state().await.last_command_time(), stamp);
}

#[tokio::test]
async fn test_auto_fire_has_no_effect() {
    let (backend, controller) = tracking_controller(test_config());
    controller.set_tracking_mode(true, true).await;
    controller.set_target(320, 180).await.unwrap();

    controller
        .evaluate_frame(&[centered_at(400, 300)], Instant::now())
        .await;

    assert_eq!(backend.written_lines(), vec!["RIGHT", "DOWN"]);
}
