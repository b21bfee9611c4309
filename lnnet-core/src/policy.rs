use std::time::Duration;

use serde::Deserialize;

use crate::poller::PollSpec;

/// Every interval, timeout and amount the bring-up uses
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub backend_timeout: Duration,
    pub backend_interval: Duration,
    pub node_ready_timeout: Duration,
    pub node_ready_interval: Duration,
    pub peer_connect_timeout: Duration,
    pub channel_confirm_timeout: Duration,
    pub funding_confirm_timeout: Duration,
    /// Interval for the peer, channel and funding polls
    pub poll_interval: Duration,
    /// Blocks the chain must have before anything is funded
    pub min_chain_height: u64,
    /// A node holding less than this on chain gets a top-up
    pub min_balance_sat: u64,
    pub topup_sat: u64,
    pub funding_confirmations: u64,
    pub channel_capacity_sat: u64,
    pub channel_confirmations: u64,
    /// Let channel opens spend unconfirmed change
    pub channel_open_minconf: u32,
    /// Opener groups driven at once
    pub max_parallel_links: usize,
    pub probe_payment: bool,
    pub probe_amount_msat: u64,
    pub probe_timeout: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            backend_timeout: Duration::from_secs(30),
            backend_interval: Duration::from_millis(500),
            node_ready_timeout: Duration::from_secs(60),
            node_ready_interval: Duration::from_secs(1),
            peer_connect_timeout: Duration::from_secs(30),
            channel_confirm_timeout: Duration::from_secs(60),
            funding_confirm_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            min_chain_height: 150,
            min_balance_sat: 50_000_000,
            topup_sat: 100_000_000,
            funding_confirmations: 6,
            channel_capacity_sat: 100_000,
            channel_confirmations: 6,
            channel_open_minconf: 0,
            max_parallel_links: 4,
            probe_payment: false,
            probe_amount_msat: 1,
            probe_timeout: Duration::from_secs(60),
        }
    }
}

impl Policy {
    pub fn backend_poll(&self) -> PollSpec {
        PollSpec::new(self.backend_interval, self.backend_timeout)
    }

    pub fn node_ready_poll(&self) -> PollSpec {
        PollSpec::new(self.node_ready_interval, self.node_ready_timeout)
    }

    pub fn peer_connect_poll(&self) -> PollSpec {
        PollSpec::new(self.poll_interval, self.peer_connect_timeout)
    }

    pub fn channel_confirm_poll(&self) -> PollSpec {
        PollSpec::new(self.poll_interval, self.channel_confirm_timeout)
    }

    pub fn funding_confirm_poll(&self) -> PollSpec {
        PollSpec::new(self.poll_interval, self.funding_confirm_timeout)
    }

    pub fn probe_poll(&self) -> PollSpec {
        PollSpec::new(self.poll_interval, self.probe_timeout)
    }

    /// Apply the keys present in `o` on top of this policy.  Negative or
    /// non-finite durations are rejected.
    pub fn with_overrides(mut self, o: &PolicyOverrides) -> Result<Self, String> {
        fn secs(v: Option<f64>, d: &mut Duration) -> Result<(), String> {
            if let Some(s) = v {
                *d = Duration::try_from_secs_f64(s)
                    .map_err(|_| format!("{} is not a valid number of seconds", s))?;
            }
            Ok(())
        }
        fn set<T: Copy>(v: Option<T>, d: &mut T) {
            if let Some(x) = v {
                *d = x;
            }
        }
        secs(o.backend_timeout, &mut self.backend_timeout)?;
        secs(o.backend_interval, &mut self.backend_interval)?;
        secs(o.node_ready_timeout, &mut self.node_ready_timeout)?;
        secs(o.node_ready_interval, &mut self.node_ready_interval)?;
        secs(o.peer_connect_timeout, &mut self.peer_connect_timeout)?;
        secs(o.channel_confirm_timeout, &mut self.channel_confirm_timeout)?;
        secs(o.funding_confirm_timeout, &mut self.funding_confirm_timeout)?;
        secs(o.poll_interval, &mut self.poll_interval)?;
        secs(o.probe_timeout, &mut self.probe_timeout)?;
        set(o.min_chain_height, &mut self.min_chain_height);
        set(o.min_balance_sat, &mut self.min_balance_sat);
        set(o.topup_sat, &mut self.topup_sat);
        set(o.funding_confirmations, &mut self.funding_confirmations);
        set(o.channel_capacity_sat, &mut self.channel_capacity_sat);
        set(o.channel_confirmations, &mut self.channel_confirmations);
        set(o.channel_open_minconf, &mut self.channel_open_minconf);
        set(o.max_parallel_links, &mut self.max_parallel_links);
        set(o.probe_payment, &mut self.probe_payment);
        set(o.probe_amount_msat, &mut self.probe_amount_msat);
        Ok(self)
    }

    /// Reject combinations that cannot make progress
    pub fn validate(&self) -> Result<(), String> {
        let intervals = [
            ("backend_interval", self.backend_interval),
            ("node_ready_interval", self.node_ready_interval),
            ("poll_interval", self.poll_interval),
        ];
        for (name, d) in intervals {
            if d.is_zero() {
                return Err(format!("{} must be positive", name));
            }
        }
        if self.topup_sat < self.min_balance_sat {
            return Err(format!(
                "topup_sat {} is below min_balance_sat {}",
                self.topup_sat, self.min_balance_sat
            ));
        }
        if self.channel_capacity_sat == 0 {
            return Err("channel_capacity_sat must be positive".to_string());
        }
        if self.max_parallel_links == 0 {
            return Err("max_parallel_links must be at least 1".to_string());
        }
        if self.funding_confirmations == 0 || self.channel_confirmations == 0 {
            return Err("confirmation counts must be at least 1".to_string());
        }
        if self.probe_amount_msat == 0 {
            return Err("probe_amount_msat must be positive".to_string());
        }
        Ok(())
    }
}

/// Policy keys as read from a config file.  Durations are in seconds.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    pub backend_timeout: Option<f64>,
    pub backend_interval: Option<f64>,
    pub node_ready_timeout: Option<f64>,
    pub node_ready_interval: Option<f64>,
    pub peer_connect_timeout: Option<f64>,
    pub channel_confirm_timeout: Option<f64>,
    pub funding_confirm_timeout: Option<f64>,
    pub poll_interval: Option<f64>,
    pub probe_timeout: Option<f64>,
    pub min_chain_height: Option<u64>,
    pub min_balance_sat: Option<u64>,
    pub topup_sat: Option<u64>,
    pub funding_confirmations: Option<u64>,
    pub channel_capacity_sat: Option<u64>,
    pub channel_confirmations: Option<u64>,
    pub channel_open_minconf: Option<u32>,
    pub max_parallel_links: Option<usize>,
    pub probe_payment: Option<bool>,
    pub probe_amount_msat: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_test() {
        let p = Policy::default();
        assert_eq!(
            p.node_ready_poll(),
            PollSpec::new(Duration::from_secs(1), Duration::from_secs(60))
        );
        assert_eq!(p.backend_poll().timeout, Duration::from_secs(30));
        assert_eq!(p.min_chain_height, 150);
        assert!(!p.probe_payment);
        p.validate().unwrap();
    }

    #[test]
    fn overrides_test() {
        let o: PolicyOverrides = serde_json::from_value(json!({
            "node_ready_timeout": 5,
            "poll_interval": 0.25,
            "channel_capacity_sat": 250000,
            "probe_payment": true
        }))
        .unwrap();
        let p = Policy::default().with_overrides(&o).unwrap();
        assert_eq!(p.node_ready_timeout, Duration::from_secs(5));
        assert_eq!(p.poll_interval, Duration::from_millis(250));
        assert_eq!(p.channel_capacity_sat, 250_000);
        assert!(p.probe_payment);
        assert_eq!(p.peer_connect_timeout, Duration::from_secs(30));

        assert!(serde_json::from_value::<PolicyOverrides>(json!({ "bogus": 1 })).is_err());
        let negative = PolicyOverrides { probe_timeout: Some(-1.0), ..Default::default() };
        assert!(Policy::default().with_overrides(&negative).is_err());
    }

    #[test]
    fn validate_test() {
        let mut p = Policy::default();
        p.topup_sat = 1;
        assert!(p.validate().unwrap_err().contains("topup_sat"));
        let mut p = Policy::default();
        p.poll_interval = Duration::ZERO;
        assert!(p.validate().is_err());
        let mut p = Policy::default();
        p.max_parallel_links = 0;
        assert!(p.validate().is_err());
    }
}
