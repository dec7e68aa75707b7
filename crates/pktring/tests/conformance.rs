//! Conformance scenarios from pktring-testkit, run against both region
//! backends.

use pktring::{RingConfig, RingProducer, ShmRing};
use pktring_testkit::{RingFactory, TestError};

struct MemfdFactory;

impl RingFactory for MemfdFactory {
    fn create(config: RingConfig) -> Result<(ShmRing, RingProducer), TestError> {
        ShmRing::create(config).map_err(|e| TestError::Setup(e.to_string()))
    }
}

struct AnonymousFactory;

impl RingFactory for AnonymousFactory {
    fn create(config: RingConfig) -> Result<(ShmRing, RingProducer), TestError> {
        ShmRing::create_anonymous(config).map_err(|e| TestError::Setup(e.to_string()))
    }
}

macro_rules! backend_tests {
    ($module:ident, $factory:ty) => {
        mod $module {
            use super::*;

            #[test]
            fn single_packet_round_trip() {
                pktring_testkit::run_single_packet_round_trip::<$factory>();
            }

            #[test]
            fn wrapped_header_decode() {
                pktring_testkit::run_wrapped_header_decode::<$factory>();
            }

            #[test]
            fn drop_burst() {
                pktring_testkit::run_drop_burst::<$factory>();
            }

            #[test]
            fn watermark_hysteresis() {
                pktring_testkit::run_watermark_hysteresis::<$factory>();
            }

            #[test]
            fn exact_fill() {
                pktring_testkit::run_exact_fill::<$factory>();
            }

            #[test]
            fn reset_idle() {
                pktring_testkit::run_reset_idle::<$factory>();
            }

            #[tokio::test]
            async fn doorbell_wakeup() {
                pktring_testkit::run_doorbell_wakeup::<$factory>().await;
            }
        }
    };
}

backend_tests!(memfd, MemfdFactory);
backend_tests!(anonymous, AnonymousFactory);
