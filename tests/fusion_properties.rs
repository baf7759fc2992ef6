#![allow(missing_docs)]

//! Property tests for the fusion engine's tracking invariants.

use std::sync::Arc;

use proptest::prelude::*;
use proximity_sentry::core::config::{Config, ConfigHandle};
use proximity_sentry::core::types::{Reading, SensorSource};
use proximity_sentry::fusion::{EventQueue, FusionEngine, HISTORY_LEN, ProcessOutcome};

fn engine(config: Config) -> (FusionEngine, Arc<EventQueue>) {
    let queue = Arc::new(EventQueue::new(config.event_queue_capacity));
    (
        FusionEngine::new(ConfigHandle::new(config), Arc::clone(&queue)),
        queue,
    )
}

fn source() -> impl Strategy<Value = SensorSource> {
    prop_oneof![Just(SensorSource::Bluetooth), Just(SensorSource::Wifi)]
}

proptest! {
    #[test]
    fn history_holds_the_last_five_samples_in_order(
        samples in prop::collection::vec(-110i32..0, 1..40),
    ) {
        let (engine, _queue) = engine(Config::default());
        for rssi in &samples {
            engine.process(&Reading::new("10:20:30:40:50:60", *rssi, SensorSource::Bluetooth));
        }
        let record = engine.device("10:20:30:40:50:60").expect("tracked device");
        let expected: Vec<i32> = samples
            .iter()
            .copied()
            .skip(samples.len().saturating_sub(HISTORY_LEN))
            .collect();
        prop_assert!(record.signal_history.len() <= HISTORY_LEN);
        prop_assert_eq!(record.signal_history.iter().copied().collect::<Vec<_>>(), expected);
        prop_assert_eq!(record.last_signal_strength, *samples.last().expect("non-empty"));
    }

    #[test]
    fn whitelisted_addresses_never_track_or_alert(
        samples in prop::collection::vec((-110i32..0, source()), 1..30),
    ) {
        let mut config = Config::default();
        config.whitelist.insert("0A:0B:0C:0D:0E:0F".to_string(), "Trusted".to_string());
        let (engine, queue) = engine(config);
        for (rssi, source) in samples {
            let outcome = engine.process(&Reading::new("0a:0b:0c:0d:0e:0f", rssi, source));
            prop_assert_eq!(outcome, ProcessOutcome::Whitelisted);
        }
        prop_assert_eq!(engine.tracked_devices(), 0);
        prop_assert!(queue.is_empty());
    }

    #[test]
    fn alert_iff_rule_holds_on_second_reading(
        first in -110i32..0,
        second in -110i32..0,
        approach_delta in 1i32..30,
    ) {
        let config = Config { approach_delta, ..Config::default() };
        let threshold = config.rssi_threshold_alert;
        let (engine, queue) = engine(config);

        let baseline = engine.process(&Reading::new("AA:AA:AA:AA:AA:AA", first, SensorSource::Wifi));
        prop_assert_eq!(baseline, ProcessOutcome::Baseline);
        let outcome = engine.process(&Reading::new("AA:AA:AA:AA:AA:AA", second, SensorSource::Wifi));

        let should_alert = second - first >= approach_delta && second > threshold;
        prop_assert_eq!(matches!(outcome, ProcessOutcome::Alerted(_)), should_alert);
        prop_assert_eq!(queue.len(), usize::from(should_alert));
    }

    #[test]
    fn tracking_table_respects_capacity(
        count in 1usize..60,
        capacity in 1usize..20,
    ) {
        let config = Config { max_tracked_devices: capacity, ..Config::default() };
        let (engine, _queue) = engine(config);
        for i in 0..count {
            let mac = format!("00:00:00:00:{:02X}:{:02X}", i / 256, i % 256);
            engine.process(&Reading::new(&mac, -60, SensorSource::Bluetooth));
            prop_assert!(engine.tracked_devices() <= capacity);
        }
        prop_assert_eq!(engine.tracked_devices(), count.min(capacity));
    }
}
