//! Integration tests for the RRC control-plane engine.
//!
//! These tests drive a full network worker through its public handle and the
//! driver-event entry point, the same way the daemon and the real driver
//! thread do: discovery, pairing, validation (with and without ASB key
//! rotation), heartbeat exchanges, RIB writes, blackout, and restart reload.

use std::sync::Arc;
use std::time::Duration;

use rrc_core::blackout::BlackoutSettings;
use rrc_core::harness::{bind_remote, heartbeat_in, pair_remote, spawn_default, spawn_network};
use rrc_core::network::{Collaborators, Network, NetworkConfig};
use rrc_core::types::{
    BindingType, ControllerId, IeeeAddress, UnbindReason, ValidationState, ValidationType,
};
use rrc_core::{CoreError, NetworkEvent};
use rrc_hal::crypto::HmacKeyDerivation;
use rrc_hal::db::{table, Database, MemoryDatabase};
use rrc_hal::driver::{ConfirmStatus, DriverEvent, DriverProperty};
use rrc_hal::mock::{MockDriver, MockVoice};
use rrc_wire::attrs::id as attr_id;
use rrc_wire::frames::{
    response_flags, trigger, HeartbeatResponse, PollingActionKind, FRAME_HEARTBEAT_RESPONSE,
};

const XR15_DEVICE_TYPE: u8 = 0x02;

fn ctrl1() -> ControllerId {
    ControllerId(1)
}

fn ieee1() -> IeeeAddress {
    IeeeAddress::new(0x00124B00_11223344)
}

/// Heartbeat responses captured by the mock driver, oldest first.
fn heartbeat_responses(driver: &MockDriver) -> Vec<HeartbeatResponse> {
    driver
        .sent_frames()
        .iter()
        .filter(|f| f.data.first() == Some(&FRAME_HEARTBEAT_RESPONSE))
        .map(|f| HeartbeatResponse::decode(&f.data).expect("valid response frame"))
        .collect()
}

/// Give spawned response timers time to fire.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn pairing_and_validation_flow() {
    let net = spawn_default().await;
    let mut events = net.handle.subscribe();

    pair_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    // Rendezvous through the worker before looking at driver state.
    let statuses = net.handle.status().await;
    assert_eq!(net.driver.paired.lock().unwrap().as_slice(), &[ieee1().raw()]);
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].validation, ValidationState::Pending);

    net.handle
        .validate(
            ctrl1(),
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            Some(1_700_000_000),
            None,
        )
        .await
        .expect("validation succeeds");

    let statuses = net.handle.status().await;
    assert_eq!(statuses[0].validation, ValidationState::Success);
    assert_eq!(statuses[0].time_binding, 1_700_000_000);

    // The controller row and its RIB snapshot were persisted.
    let row = net
        .db
        .read(table::CONTROLLERS, &ieee1().db_key())
        .await
        .unwrap();
    assert!(row.is_some());
    assert!(net.db.row_count(table::RIB).await > 0);

    match events.recv().await.expect("bound event") {
        NetworkEvent::Bound { controller_id, ieee_address } => {
            assert_eq!(controller_id, ctrl1());
            assert_eq!(ieee_address, ieee1());
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn heartbeats_drain_actions_in_priority_order() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    // Validation queued the configuration push; add two lower-priority ones
    // in the "wrong" order.
    net.handle
        .enqueue_action(ctrl1(), rrc_core::polling::PollingAction::new(PollingActionKind::Led))
        .await
        .unwrap();
    net.handle
        .enqueue_action(
            ctrl1(),
            rrc_core::polling::PollingAction::new(PollingActionKind::Metrics),
        )
        .await
        .unwrap();

    heartbeat_in(&net, ctrl1(), trigger::TIME, 0).await;
    settle().await;
    net.handle
        .driver_event(DriverEvent::DataConfirmation {
            controller_id: ctrl1().0,
            status: ConfirmStatus::Success,
        })
        .await;

    heartbeat_in(&net, ctrl1(), trigger::TIME, 1_000).await;
    settle().await;
    heartbeat_in(&net, ctrl1(), trigger::TIME, 2_000).await;
    settle().await;

    let responses = heartbeat_responses(&net.driver);
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].action, PollingActionKind::PollingConfiguration);
    assert!(responses[0].flags & response_flags::POLL_AGAIN != 0);
    assert_eq!(responses[1].action, PollingActionKind::Metrics);
    assert!(responses[1].flags & response_flags::POLL_AGAIN != 0);
    assert_eq!(responses[2].action, PollingActionKind::Led);
    assert!(responses[2].flags & response_flags::POLL_AGAIN == 0);

    // Confirmed delivery of the configuration push flipped the state.
    let statuses = net.handle.status().await;
    assert_eq!(
        statuses[0].configuration,
        rrc_core::types::ConfigurationState::Success
    );
}

#[tokio::test]
async fn unvalidated_remote_gets_bare_no_action() {
    let net = spawn_default().await;
    pair_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    net.handle
        .enqueue_action(ctrl1(), rrc_core::polling::PollingAction::new(PollingActionKind::Reboot))
        .await
        .unwrap();

    heartbeat_in(&net, ctrl1(), trigger::TIME, 0).await;
    settle().await;

    let responses = heartbeat_responses(&net.driver);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].action, PollingActionKind::NoAction);

    // The queue survived; after validation the reboot outranks the freshly
    // queued configuration push.
    net.handle
        .validate(
            ctrl1(),
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            None,
            None,
        )
        .await
        .unwrap();
    heartbeat_in(&net, ctrl1(), trigger::TIME, 1_000).await;
    settle().await;

    let responses = heartbeat_responses(&net.driver);
    assert_eq!(responses.last().unwrap().action, PollingActionKind::Reboot);
}

#[tokio::test]
async fn rib_writes_validate_length_and_fan_out() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;
    let mut events = net.handle.subscribe();

    // Wrong length: total rejection, achieved length 0.
    let achieved = net
        .handle
        .rib_write(ctrl1(), attr_id::PRIVACY, 0, vec![1, 2, 3])
        .await
        .unwrap();
    assert_eq!(achieved, 0);

    // Exact length: accepted, persisted, and re-exported to the remote NVM.
    let achieved = net.handle.rib_write(ctrl1(), attr_id::PRIVACY, 0, vec![1]).await.unwrap();
    assert_eq!(achieved, 1);
    assert_eq!(net.handle.rib_read(ctrl1(), attr_id::PRIVACY, 0).await.unwrap(), vec![1]);
    let exported = net.driver.exported();
    assert!(exported
        .iter()
        .any(|e| e.identifier == attr_id::PRIVACY && e.data == vec![1]));

    // A network-wide write fans out to the bound remote and broadcasts.
    let value = vec![0xA5u8; 16];
    let achieved = net
        .handle
        .rib_write(ctrl1(), attr_id::GENERAL_PURPOSE, 0, value.clone())
        .await
        .unwrap();
    assert_eq!(achieved, 16);
    assert!(net
        .driver
        .exported()
        .iter()
        .any(|e| e.identifier == attr_id::GENERAL_PURPOSE && e.data == value));
    assert!(net
        .db
        .read(table::RIB, "net/11/00")
        .await
        .unwrap()
        .is_some());

    // Drain events until the broadcast shows up.
    loop {
        match events.recv().await.expect("event stream open") {
            NetworkEvent::RibUpdated { identifier, index } => {
                assert_eq!((identifier, index), (attr_id::GENERAL_PURPOSE, 0));
                break;
            }
            _ => continue,
        }
    }

    // The bound remote hears about the shared change on its next check-in.
    heartbeat_in(&net, ctrl1(), trigger::TIME, 0).await;
    settle().await;
    let responses = heartbeat_responses(&net.driver);
    assert!(responses.last().unwrap().flags & response_flags::RIB_PENDING != 0);
}

#[tokio::test]
async fn blackout_opens_escalates_and_reopens() {
    let config = NetworkConfig {
        blackout: BlackoutSettings {
            fail_threshold: 3,
            blackout_time: Duration::from_millis(50),
            reboot_threshold: 5,
            force_local: false,
        },
        ..NetworkConfig::default()
    };
    let net = spawn_network(config).await;

    for _ in 0..3 {
        net.handle
            .driver_event(DriverEvent::PairConfirmation {
                controller_id: 1,
                ieee_address: ieee1().raw(),
                status: ConfirmStatus::Timeout,
            })
            .await;
    }
    let state = net.handle.blackout_state().await;
    assert!(state.is_blackout);
    assert_eq!(state.blackout_count, 1);

    // Discovery during blackout is rejected: no pair request reaches the
    // driver.
    net.handle
        .driver_event(DriverEvent::DiscoveryIndication {
            ieee_address: ieee1().raw(),
            device_type: XR15_DEVICE_TYPE,
        })
        .await;
    assert!(net.driver.paired.lock().unwrap().is_empty());

    // After the timer expires the network reopens with escalation armed.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let state = net.handle.blackout_state().await;
    assert!(!state.is_blackout);
    assert_eq!(state.fail_count, 0);
    assert_eq!(state.time_increment, 2);

    net.handle
        .driver_event(DriverEvent::DiscoveryIndication {
            ieee_address: ieee1().raw(),
            device_type: XR15_DEVICE_TYPE,
        })
        .await;
    // Rendezvous to make sure the worker processed the discovery.
    let _ = net.handle.status().await;
    assert_eq!(net.driver.paired.lock().unwrap().as_slice(), &[ieee1().raw()]);
}

#[tokio::test]
async fn unbind_removes_all_persisted_state() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;
    assert!(net
        .db
        .read(table::CONTROLLERS, &ieee1().db_key())
        .await
        .unwrap()
        .is_some());

    net.handle.unbind(ctrl1(), UnbindReason::Requested).await.expect("unbind");

    assert!(net
        .db
        .read(table::CONTROLLERS, &ieee1().db_key())
        .await
        .unwrap()
        .is_none());
    assert_eq!(net.db.row_count(table::RIB).await, 0);
    assert_eq!(net.driver.unpaired.lock().unwrap().as_slice(), &[ctrl1().0]);
    assert!(net.handle.status().await.is_empty());

    // A second unbind finds nothing.
    assert!(matches!(
        net.handle.unbind(ctrl1(), UnbindReason::Requested).await,
        Err(CoreError::UnknownController(_))
    ));
}

#[tokio::test]
async fn asb_rotation_installs_a_fresh_link_key() {
    let net = spawn_default().await;
    pair_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    let old_key = vec![0x11u8; 16];
    net.driver
        .set_property(DriverProperty::LinkKey(ctrl1().0), old_key.clone());
    net.driver.set_property(DriverProperty::AsbMethods, vec![0x01]);

    // The remote advertises HMAC-SHA256 in its capabilities attribute.
    let mut caps = vec![0u8; 8];
    caps[0] = 0x01;
    net.handle
        .rib_write(ctrl1(), attr_id::CONTROLLER_CAPABILITIES, 0, caps)
        .await
        .unwrap();

    // Validation blocks through the key rotation and completes.
    net.handle
        .validate(
            ctrl1(),
            BindingType::Interactive,
            ValidationType::Application,
            ValidationState::Success,
            None,
            None,
        )
        .await
        .expect("validation with asb succeeds");

    let new_key = net
        .driver
        .property(DriverProperty::LinkKey(ctrl1().0))
        .expect("link key installed");
    assert_ne!(new_key, old_key);
    assert_eq!(new_key.len(), 16);

    let statuses = net.handle.status().await;
    assert_eq!(statuses[0].validation, ValidationState::Success);
}

#[tokio::test]
async fn stale_voice_trigger_terminates_the_session() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    // Remote claims a session is running, pipeline says nothing streams.
    net.voice.set_streaming(ctrl1().0, false);
    heartbeat_in(&net, ctrl1(), trigger::VOICE_SESSION, 0).await;
    let _ = net.handle.status().await;
    assert_eq!(net.voice.terminated.lock().unwrap().as_slice(), &[ctrl1().0]);
}

#[tokio::test]
async fn restart_reloads_controllers_without_exporting() {
    let db: Arc<MemoryDatabase> = Arc::new(MemoryDatabase::new());

    // First life: bind a remote and give it a non-default attribute.
    {
        let driver = Arc::new(MockDriver::new());
        let handle = Network::spawn(
            NetworkConfig::default(),
            Collaborators {
                driver: driver.clone(),
                crypto: Arc::new(HmacKeyDerivation),
                db: db.clone(),
                voice: Arc::new(MockVoice::new()),
            },
        )
        .await
        .unwrap();

        handle
            .driver_event(DriverEvent::DiscoveryIndication {
                ieee_address: ieee1().raw(),
                device_type: XR15_DEVICE_TYPE,
            })
            .await;
        handle
            .driver_event(DriverEvent::PairConfirmation {
                controller_id: ctrl1().0,
                ieee_address: ieee1().raw(),
                status: ConfirmStatus::Success,
            })
            .await;
        handle
            .validate(
                ctrl1(),
                BindingType::Interactive,
                ValidationType::Application,
                ValidationState::Success,
                None,
                None,
            )
            .await
            .unwrap();
        handle.rib_write(ctrl1(), attr_id::PRIVACY, 0, vec![1]).await.unwrap();
        handle.shutdown().await;
    }

    // Second life: state comes back from the database, and the load does not
    // echo anything to the remote.
    let driver = Arc::new(MockDriver::new());
    let handle = Network::spawn(
        NetworkConfig::default(),
        Collaborators {
            driver: driver.clone(),
            crypto: Arc::new(HmacKeyDerivation),
            db,
            voice: Arc::new(MockVoice::new()),
        },
    )
    .await
    .unwrap();

    let statuses = handle.status().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].controller_id, ctrl1());
    assert_eq!(statuses[0].validation, ValidationState::Success);
    assert_eq!(handle.rib_read(ctrl1(), attr_id::PRIVACY, 0).await.unwrap(), vec![1]);
    assert!(driver.exported().is_empty());
    assert!(driver.sent_frames().is_empty());
}

#[tokio::test]
async fn failed_send_requeues_the_in_flight_action() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    net.driver.fail_sends(true);
    heartbeat_in(&net, ctrl1(), trigger::TIME, 0).await;
    settle().await;

    // Nothing went out, and the configuration push is queued again.
    assert!(heartbeat_responses(&net.driver).is_empty());
    net.driver.fail_sends(false);

    heartbeat_in(&net, ctrl1(), trigger::TIME, 1_000).await;
    settle().await;
    let responses = heartbeat_responses(&net.driver);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].action, PollingActionKind::PollingConfiguration);

    // A voice session request goes through the pipeline once validated.
    let decision = net.handle.begin_voice_session(ctrl1(), 0x01).await.unwrap();
    assert_eq!(decision, rrc_hal::voice::SessionDecision::Accept);
}

#[tokio::test]
async fn response_timing_ignores_driver_timestamp_skew() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    // The driver stamps frames on its own clock; whether it runs far ahead
    // of or behind ours, the reply still goes out one idle delay after the
    // frame arrives at the worker.
    heartbeat_in(&net, ctrl1(), trigger::TIME, 10_000_000).await;
    settle().await;
    assert_eq!(heartbeat_responses(&net.driver).len(), 1);

    heartbeat_in(&net, ctrl1(), trigger::TIME, 0).await;
    settle().await;
    assert_eq!(heartbeat_responses(&net.driver).len(), 2);
}

#[tokio::test]
async fn xr15_repair_injects_synthetic_irdb_signature() {
    let net = spawn_default().await;
    bind_remote(&net, ctrl1(), ieee1(), XR15_DEVICE_TYPE).await;

    // The same remote pairs again (new remote-side state after battery pull).
    net.handle
        .driver_event(DriverEvent::PairConfirmation {
            controller_id: ctrl1().0,
            ieee_address: ieee1().raw(),
            status: ConfirmStatus::Success,
        })
        .await;
    let _ = net.handle.status().await;

    // Validation reverted and the workaround signature landed in IRDB status.
    let statuses = net.handle.status().await;
    assert_eq!(statuses[0].validation, ValidationState::Pending);
    let sig = net.handle.rib_read(ctrl1(), attr_id::IRDB_STATUS, 0).await.unwrap();
    assert_eq!(&sig[..8], b"XR15-704");
    assert!(net
        .driver
        .exported()
        .iter()
        .any(|e| e.identifier == attr_id::IRDB_STATUS && e.data == sig));
}
