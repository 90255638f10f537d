//! Persistent per-session decision state.
//!
//! The route state rides inside the signed session data, so every bit set
//! here survives round trips through the SDK and forms the decision trail
//! inspected by the summary writer. Several bits are sticky for the life of
//! the session (`veto`, `not_selected`, `disabled`).

/// Decision-state bits carried in session data.
///
/// Packed to a `u32` on the wire; field order here matches bit order there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteState {
    /// Session is currently on an accelerated route.
    pub next: bool,
    /// Terminal trap: the session stays direct for its remaining life.
    pub veto: bool,
    /// Buyer shader has AB testing enabled for this session.
    pub ab_test: bool,
    /// AB test: session landed in the accelerated half.
    pub a: bool,
    /// AB test: session landed in the control half.
    pub b: bool,
    /// AB test control half, never accelerated.
    pub not_selected: bool,
    /// Shader disabled acceleration outright.
    pub disabled: bool,
    /// Shader forced acceleration regardless of thresholds.
    pub forced_next: bool,
    /// Left acceleration because next RTT drifted above direct + veto margin.
    pub latency_worse: bool,
    /// Left acceleration because measured RTT exceeded the prediction.
    pub mispredict: bool,
    /// Not enough distinct source relays had viable routes.
    pub lack_of_diversity: bool,
    /// Send on both direct and accelerated paths simultaneously.
    pub multipath: bool,
    /// Current/last acceleration was taken to reduce latency.
    pub reduce_latency: bool,
    /// Current/last acceleration was taken to reduce packet loss.
    pub reduce_packet_loss: bool,
    /// The previously chosen route vanished from the route matrix.
    pub no_route: bool,
}

impl RouteState {
    pub fn pack(&self) -> u32 {
        let mut bits = 0u32;
        let fields = [
            self.next,
            self.veto,
            self.ab_test,
            self.a,
            self.b,
            self.not_selected,
            self.disabled,
            self.forced_next,
            self.latency_worse,
            self.mispredict,
            self.lack_of_diversity,
            self.multipath,
            self.reduce_latency,
            self.reduce_packet_loss,
            self.no_route,
        ];
        for (i, f) in fields.iter().enumerate() {
            if *f {
                bits |= 1 << i;
            }
        }
        bits
    }

    pub fn unpack(bits: u32) -> Self {
        let get = |i: u32| bits & (1 << i) != 0;
        Self {
            next: get(0),
            veto: get(1),
            ab_test: get(2),
            a: get(3),
            b: get(4),
            not_selected: get(5),
            disabled: get(6),
            forced_next: get(7),
            latency_worse: get(8),
            mispredict: get(9),
            lack_of_diversity: get(10),
            multipath: get(11),
            reduce_latency: get(12),
            reduce_packet_loss: get(13),
            no_route: get(14),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let mut state = RouteState::default();
        state.next = true;
        state.veto = true;
        state.mispredict = true;
        state.reduce_latency = true;
        assert_eq!(RouteState::unpack(state.pack()), state);
        assert_eq!(RouteState::unpack(0), RouteState::default());
    }

    #[test]
    fn every_bit_is_distinct() {
        // Flipping each field must flip exactly one bit.
        let base = RouteState::default().pack();
        let mut seen = std::collections::HashSet::new();
        for i in 0..15u32 {
            let bits = base | (1 << i);
            let state = RouteState::unpack(bits);
            assert_eq!(state.pack(), bits);
            assert!(seen.insert(bits));
        }
    }
}
