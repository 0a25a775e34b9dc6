
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::attrs::{BatteryStatus, MetricsCounters, PollingConfiguration, Version};
    use crate::frames::{
        HeartbeatFrame, HeartbeatResponse, PollingActionKind, RibSetRequest, RibSetResponse,
        HEARTBEAT_PAYLOAD_MAX,
    };

    fn action_kind() -> impl Strategy<Value = PollingActionKind> {
        prop_oneof![
            Just(PollingActionKind::NoAction),
            Just(PollingActionKind::Reboot),
            Just(PollingActionKind::Repair),
            Just(PollingActionKind::PollingConfiguration),
            Just(PollingActionKind::IrdbStatus),
            Just(PollingActionKind::KeyRotation),
            Just(PollingActionKind::Metrics),
            Just(PollingActionKind::Led),
        ]
    }

    proptest! {
        #[test]
        fn heartbeat_frame_round_trip(trigger in any::<u8>()) {
            let frame = HeartbeatFrame { trigger };
            prop_assert_eq!(HeartbeatFrame::decode(&frame.encode()).unwrap(), frame);
        }

        #[test]
        fn heartbeat_response_round_trip(
            flags in any::<u8>(),
            action in action_kind(),
            payload in proptest::collection::vec(any::<u8>(), 0..=HEARTBEAT_PAYLOAD_MAX)
        ) {
            let resp = HeartbeatResponse { flags, action, payload };
            let wire = resp.encode().unwrap();
            prop_assert_eq!(HeartbeatResponse::decode(&wire).unwrap(), resp);
        }

        #[test]
        fn rib_set_round_trip(
            identifier in any::<u8>(),
            index in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..=255usize)
        ) {
            let req = RibSetRequest { identifier, index, data };
            prop_assert_eq!(RibSetRequest::decode(&req.encode()).unwrap(), req);
        }

        #[test]
        fn rib_set_response_round_trip(
            identifier in any::<u8>(),
            index in any::<u8>(),
            achieved_length in any::<u8>()
        ) {
            let resp = RibSetResponse { identifier, index, achieved_length };
            prop_assert_eq!(RibSetResponse::decode(&resp.encode()).unwrap(), resp);
        }

        #[test]
        fn polling_configuration_round_trip(
            trigger_mask in any::<u8>(),
            keypress_counter in any::<u8>(),
            time_interval_ms in any::<u32>(),
            reserved in any::<u16>()
        ) {
            let cfg = PollingConfiguration { trigger_mask, keypress_counter, time_interval_ms, reserved };
            prop_assert_eq!(PollingConfiguration::decode(&cfg.encode()).unwrap(), cfg);
        }

        #[test]
        fn version_round_trip(raw in any::<[u8; 4]>()) {
            let v = Version::decode(&raw).unwrap();
            let encoded = v.encode();
            prop_assert_eq!(encoded.as_ref(), &raw[..]);
        }

        #[test]
        fn battery_and_metrics_round_trip(raw in any::<[u8; 8]>()) {
            let b = BatteryStatus::decode(&raw).unwrap();
            let b_encoded = b.encode();
            prop_assert_eq!(b_encoded.as_ref(), &raw[..]);
            let m = MetricsCounters::decode(&raw).unwrap();
            let m_encoded = m.encode();
            prop_assert_eq!(m_encoded.as_ref(), &raw[..]);
        }
    }
}
