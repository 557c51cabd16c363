//! Reusable seeds and fault presets for logspout simulation.

/// Common fault injection presets.
pub mod faults {
    use logspout_broker::BrokerFaultConfig;
    use logspout_progress::StoreFaultConfig;

    /// Broker that drops a noticeable share of fetches and connects.
    #[must_use]
    pub const fn unreliable_broker() -> BrokerFaultConfig {
        BrokerFaultConfig::none()
            .with_fetch_fail_rate(0.15)
            .with_connect_fail_rate(0.05)
    }

    /// Store whose writes fail often enough to exercise commit retries.
    #[must_use]
    pub const fn unreliable_store() -> StoreFaultConfig {
        StoreFaultConfig::none().with_put_fail_rate(0.2)
    }
}

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];
}
