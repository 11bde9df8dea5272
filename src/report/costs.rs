//! CDN cost estimate for the traffic in a (merged) snapshot
//!
//! Only on- and off-campus traffic is billable; ignored traffic never
//! reaches the CDN. Each request also carries a fixed 2 KB of overhead.

use std::fmt;

use crate::aggregate::AggregateState;

const KB_PER_TB: f64 = 1024.0 * 1024.0 * 1024.0;
const OVERHEAD_KB_PER_REQUEST: f64 = 2.0;

/// Bandwidth tiers as (lower bound in TB, USD per TB), highest first
const BANDWIDTH_TIERS: [(f64, f64); 3] = [(50.0, 60.0), (10.0, 80.0), (0.0, 85.0)];

const REQUEST_BLOCK: f64 = 10_000.0;
const REQUEST_BLOCK_PRICE: f64 = 0.01;
const WAF_BLOCK: f64 = 1_000_000.0;
const WAF_BLOCK_PRICE: f64 = 0.60;

/// Charge for the bandwidth falling in one tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierCharge {
    pub above_tb: f64,
    pub terabytes: f64,
    pub cost: f64,
}

/// Monthly cost estimate
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub requests: u64,
    pub terabytes: f64,
    pub tiers: Vec<TierCharge>,
    pub bandwidth_cost: f64,
    pub request_cost: f64,
    pub waf_cost: f64,
}

impl CostEstimate {
    pub fn from_state(state: &AggregateState) -> Self {
        let requests = state.on_campus.saturating_add(state.off_campus);
        let kbytes = state.on_campus_bytes as f64 / 1024.0
            + state.off_campus_bytes as f64 / 1024.0
            + requests as f64 * OVERHEAD_KB_PER_REQUEST;
        let terabytes = kbytes / KB_PER_TB;

        let mut remaining = terabytes;
        let mut tiers = Vec::new();
        for (above_tb, price) in BANDWIDTH_TIERS {
            // The bottom tier is always reported, even when empty
            if remaining > above_tb || above_tb == 0.0 {
                let in_tier = (remaining - above_tb).max(0.0);
                tiers.push(TierCharge {
                    above_tb,
                    terabytes: in_tier,
                    cost: in_tier * price,
                });
                remaining = remaining.min(above_tb);
            }
        }
        let bandwidth_cost: f64 = tiers.iter().map(|t| t.cost).sum();

        let request_cost = (requests as f64 / REQUEST_BLOCK).ceil() * REQUEST_BLOCK_PRICE;
        let waf_cost = (requests as f64 / WAF_BLOCK).ceil() * WAF_BLOCK_PRICE;

        Self {
            requests,
            terabytes,
            tiers,
            bandwidth_cost,
            request_cost,
            waf_cost,
        }
    }

    pub fn total(&self) -> f64 {
        self.bandwidth_cost + self.request_cost + self.waf_cost
    }
}

impl fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tier in &self.tiers {
            writeln!(
                f,
                "  {:.2} terabytes over {:.1} adds $ {:.2} / month",
                tier.terabytes, tier.above_tb, tier.cost
            )?;
        }
        writeln!(
            f,
            "total bandwidth {:.2} terabytes cost= $ {:.2} / month",
            self.terabytes, self.bandwidth_cost
        )?;
        writeln!(
            f,
            "request cost (all https): {} requests = $ {:.2} / month",
            super::group_thousands(i64::try_from(self.requests).unwrap_or(i64::MAX)),
            self.request_cost
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "WAF per million requests: {} requests = $ {:.2} / month",
            super::group_thousands(i64::try_from(self.requests).unwrap_or(i64::MAX)),
            self.waf_cost
        )?;
        writeln!(f)?;
        writeln!(f, "total / month cost = $ {:.2}", self.total())
    }
}
