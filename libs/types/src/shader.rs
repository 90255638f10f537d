//! Route shader: the per-buyer decision policy.
//!
//! Every threshold the route decision engine consults lives here. Shaders are
//! authored in the admin surface, stored with the buyer, and arrive in the
//! database snapshot. Defaults match the production "reduce latency only"
//! policy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RouteShader {
    /// Split sessions into A (accelerated) and B (control) halves.
    pub ab_test: bool,
    /// Percentage of sessions in the A half when AB testing, 0-100.
    pub selection_percent: f32,

    /// Direct RTT headroom; acceleration is only considered beyond this.
    pub acceptable_latency: i32,
    /// Instantaneous real packet loss % that triggers loss-reduction routing.
    pub acceptable_packet_loss_instant: f32,
    /// Sustained real packet loss % that triggers loss-reduction routing.
    pub acceptable_packet_loss_sustained: f32,

    /// Minimum RTT improvement (ms) to first take an accelerated route.
    pub latency_reduction_threshold: i32,
    /// RTT we will pay (ms) to reduce packet loss or jitter.
    pub max_latency_trade_off: i32,
    /// Ceiling on accelerated route RTT (ms).
    pub max_next_rtt: i32,
    /// A different route must beat the current one by this much (ms).
    pub route_switch_threshold: i32,
    /// First selection must beat direct by this much (ms).
    pub route_select_threshold: i32,

    /// Leave acceleration when next RTT drifts this far above direct (ms).
    pub rtt_veto_default: i32,
    /// Veto margin while multipath is active.
    pub rtt_veto_multipath: i32,
    /// Veto margin while on a loss-reduction route.
    pub rtt_veto_packetloss: i32,
    /// Deprecated scalar form. When present it seeds all three veto margins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_veto: Option<i32>,

    /// Accelerate to reduce latency.
    pub reduce_latency: bool,
    /// Accelerate to reduce packet loss.
    pub reduce_packet_loss: bool,

    pub multipath: bool,
    /// Take the best route unconditionally.
    pub force_next: bool,
    /// Observe and report only; never accelerate.
    pub analysis_only: bool,
    /// Hard off switch for this buyer.
    pub disable_network_next: bool,

    /// Per-slice bandwidth budget encoded into route tokens.
    pub bandwidth_envelope_up_kbps: i32,
    pub bandwidth_envelope_down_kbps: i32,

    /// Minimum distinct source relays that must have viable routes.
    pub route_diversity: i32,
}

impl Default for RouteShader {
    fn default() -> Self {
        Self {
            ab_test: false,
            selection_percent: 100.0,
            acceptable_latency: 20,
            acceptable_packet_loss_instant: 0.25,
            acceptable_packet_loss_sustained: 0.1,
            latency_reduction_threshold: 10,
            max_latency_trade_off: 20,
            max_next_rtt: 250,
            route_switch_threshold: 10,
            route_select_threshold: 5,
            rtt_veto_default: 20,
            rtt_veto_multipath: 20,
            rtt_veto_packetloss: 30,
            rtt_veto: None,
            reduce_latency: true,
            reduce_packet_loss: false,
            multipath: false,
            force_next: false,
            analysis_only: false,
            disable_network_next: false,
            bandwidth_envelope_up_kbps: 1024,
            bandwidth_envelope_down_kbps: 1024,
            route_diversity: 0,
        }
    }
}

impl RouteShader {
    /// Apply the deprecated scalar veto to all three margins.
    pub fn normalize(&mut self) {
        if let Some(veto) = self.rtt_veto.take() {
            self.rtt_veto_default = veto;
            self.rtt_veto_multipath = veto;
            self.rtt_veto_packetloss = veto;
        }
    }

    /// The veto margin that applies given the current route state.
    pub fn rtt_veto_for(&self, multipath: bool, reduce_packet_loss: bool) -> i32 {
        if multipath {
            self.rtt_veto_multipath
        } else if reduce_packet_loss {
            self.rtt_veto_packetloss
        } else {
            self.rtt_veto_default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_reduce_latency_only() {
        let shader = RouteShader::default();
        assert!(shader.reduce_latency);
        assert!(!shader.reduce_packet_loss);
        assert!(!shader.force_next);
        assert_eq!(shader.selection_percent, 100.0);
    }

    #[test]
    fn deprecated_scalar_veto_fills_all_margins() {
        let mut shader: RouteShader = serde_json::from_str(r#"{"rtt_veto": 42}"#).unwrap();
        shader.normalize();
        assert_eq!(shader.rtt_veto_default, 42);
        assert_eq!(shader.rtt_veto_multipath, 42);
        assert_eq!(shader.rtt_veto_packetloss, 42);
        assert!(shader.rtt_veto.is_none());
    }

    #[test]
    fn veto_margin_selection() {
        let shader = RouteShader::default();
        assert_eq!(shader.rtt_veto_for(true, false), shader.rtt_veto_multipath);
        assert_eq!(shader.rtt_veto_for(false, true), shader.rtt_veto_packetloss);
        assert_eq!(shader.rtt_veto_for(false, false), shader.rtt_veto_default);
    }
}
