//! The per-slice route decision engine.
//!
//! Two entry points mirror the two sides of the session state machine:
//! [`take_network_next`] decides whether a direct session should start
//! routing through relays, and [`stay_on_network_next`] re-evaluates an
//! accelerated session. Every transition from accelerated back to direct
//! sets the veto bit, so a session never oscillates.

use crate::matrix::RouteMatrix;
use types::{ab_test_selected, RouteShader, RouteState};

/// Measured RTT may exceed the prediction by this much before the session
/// is treated as mispredicted.
pub const MISPREDICT_MARGIN: i32 = 10;

/// Real jitter above this triggers the loss-reduction path.
pub const ACCEPTABLE_JITTER: f32 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    /// Predicted RTT: client → source relay ping plus the stored route cost.
    pub cost: i32,
    /// Relay indices, source relay first.
    pub relays: Vec<u32>,
}

#[derive(Debug, Default)]
pub struct RouteAnalysis {
    pub best: Option<RouteCandidate>,
    /// Distinct source relays with at least one viable route.
    pub diversity: i32,
}

/// Scan all source relay × dest relay routes and keep the best viable
/// candidate. A candidate is viable when its predicted RTT is within
/// `max_cost`.
pub fn analyze_routes(
    matrix: &RouteMatrix,
    source_relays: &[u32],
    source_relay_rtt: &[i32],
    dest_relays: &[u32],
    max_cost: i32,
) -> RouteAnalysis {
    let mut analysis = RouteAnalysis::default();

    for (i, &source) in source_relays.iter().enumerate() {
        let mut source_has_route = false;

        for &dest in dest_relays {
            if source == dest {
                // The client already pings a relay in the server's datacenter.
                let candidate = RouteCandidate {
                    cost: source_relay_rtt[i],
                    relays: vec![source],
                };
                if candidate.cost <= max_cost {
                    source_has_route = true;
                    take_if_better(&mut analysis.best, candidate);
                }
                continue;
            }

            for (route_rtt, relays) in matrix.routes(source as usize, dest as usize) {
                let candidate = RouteCandidate {
                    cost: source_relay_rtt[i] + route_rtt,
                    relays,
                };
                if candidate.cost <= max_cost {
                    source_has_route = true;
                    take_if_better(&mut analysis.best, candidate);
                }
            }
        }

        if source_has_route {
            analysis.diversity += 1;
        }
    }

    analysis
}

fn take_if_better(best: &mut Option<RouteCandidate>, candidate: RouteCandidate) {
    let better = match best {
        None => true,
        Some(current) => {
            (candidate.cost, candidate.relays.len(), &candidate.relays)
                < (current.cost, current.relays.len(), &current.relays)
        }
    };
    if better {
        *best = Some(candidate);
    }
}

/// Direct session: should we take network next this slice?
///
/// Returns the route to take, or `None` to stay direct. Mutates the route
/// state bits that explain the decision.
#[allow(clippy::too_many_arguments)]
pub fn take_network_next(
    matrix: &RouteMatrix,
    shader: &RouteShader,
    state: &mut RouteState,
    user_hash: u64,
    direct_rtt: i32,
    real_packet_loss: f32,
    sustained_packet_loss: f32,
    real_jitter: f32,
    source_relays: &[u32],
    source_relay_rtt: &[i32],
    dest_relays: &[u32],
    route_diversity: &mut i32,
    debug: &mut Option<String>,
) -> Option<RouteCandidate> {
    // Sticky outcomes from earlier slices.
    if state.veto || state.not_selected || state.disabled {
        return None;
    }

    // Forced acceleration ignores every threshold.
    if shader.force_next {
        let analysis = analyze_routes(matrix, source_relays, source_relay_rtt, dest_relays, i32::MAX);
        *route_diversity = analysis.diversity;
        if let Some(best) = analysis.best {
            state.forced_next = true;
            trace(debug, "force next");
            return accept(state, shader, best);
        }
        trace(debug, "force next: no route available");
        return None;
    }

    // AB test: the control half never accelerates.
    if shader.ab_test && !state.a && !state.b {
        if ab_test_selected(user_hash, shader.selection_percent) {
            state.a = true;
        } else {
            state.b = true;
            state.not_selected = true;
            trace(debug, "ab test: control group");
            return None;
        }
    }

    let analysis = analyze_routes(
        matrix,
        source_relays,
        source_relay_rtt,
        dest_relays,
        shader.max_next_rtt,
    );
    *route_diversity = analysis.diversity;

    let best = analysis.best?;

    if shader.route_diversity > 0 && analysis.diversity < shader.route_diversity {
        state.lack_of_diversity = true;
        trace(debug, "lack of route diversity");
        return None;
    }

    // Latency reduction: meaningful improvement over a direct path that has
    // already used up its acceptable headroom.
    if shader.reduce_latency
        && direct_rtt > shader.acceptable_latency
        && best.cost + shader.latency_reduction_threshold.max(shader.route_select_threshold)
            <= direct_rtt
    {
        state.reduce_latency = true;
        trace(debug, "take network next: reduce latency");
        return accept(state, shader, best);
    }

    // Loss/jitter reduction: pay up to the latency trade-off to stabilize a
    // lossy or jittery direct path. Instant loss comes from the game packet
    // deltas, sustained loss from the smoothed ping measurements.
    if shader.reduce_packet_loss
        && (real_packet_loss > shader.acceptable_packet_loss_instant
            || sustained_packet_loss > shader.acceptable_packet_loss_sustained
            || real_jitter > ACCEPTABLE_JITTER)
        && best.cost <= direct_rtt + shader.max_latency_trade_off
    {
        state.reduce_packet_loss = true;
        trace(debug, "take network next: reduce packet loss");
        return accept(state, shader, best);
    }

    trace(debug, "staying direct");
    None
}

fn accept(
    state: &mut RouteState,
    shader: &RouteShader,
    best: RouteCandidate,
) -> Option<RouteCandidate> {
    state.next = true;
    state.multipath = shader.multipath;
    Some(best)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StayDecision {
    pub stay: bool,
    pub route_changed: bool,
    /// The route for the next slice when staying.
    pub relays: Vec<u32>,
    /// Predicted RTT for the route above.
    pub cost: i32,
}

impl StayDecision {
    fn leave() -> Self {
        Self {
            stay: false,
            route_changed: false,
            relays: Vec::new(),
            cost: 0,
        }
    }
}

/// Accelerated session: keep the route, switch routes, or leave.
///
/// Leaving always sets the veto bit: a session that fails on next once does
/// not get a second chance.
#[allow(clippy::too_many_arguments)]
pub fn stay_on_network_next(
    matrix: &RouteMatrix,
    shader: &RouteShader,
    state: &mut RouteState,
    direct_rtt: i32,
    next_rtt: i32,
    predicted_rtt: i32,
    current_route: &[u32],
    source_relays: &[u32],
    source_relay_rtt: &[i32],
    dest_relays: &[u32],
    debug: &mut Option<String>,
) -> StayDecision {
    if current_route.is_empty() {
        state.no_route = true;
        leave_next(state);
        trace(debug, "route no longer exists");
        return StayDecision::leave();
    }

    // The prediction was wrong: the route is performing worse than the
    // matrix said it would.
    if next_rtt > predicted_rtt + MISPREDICT_MARGIN {
        state.mispredict = true;
        leave_next(state);
        trace(debug, "mispredict");
        return StayDecision::leave();
    }

    // The route is worse than the direct path by more than the veto margin.
    if next_rtt >= direct_rtt + shader.rtt_veto_for(state.multipath, state.reduce_packet_loss) {
        state.latency_worse = true;
        leave_next(state);
        trace(debug, "latency worse");
        return StayDecision::leave();
    }

    let analysis = analyze_routes(
        matrix,
        source_relays,
        source_relay_rtt,
        dest_relays,
        shader.max_next_rtt,
    );

    // Switching has hysteresis: a different route must beat the current
    // prediction by the switch threshold.
    if let Some(best) = analysis.best {
        if best.relays != current_route
            && best.cost + shader.route_switch_threshold <= predicted_rtt
        {
            trace(debug, "route changed");
            return StayDecision {
                stay: true,
                route_changed: true,
                cost: best.cost,
                relays: best.relays,
            };
        }
    }

    trace(debug, "route continued");
    StayDecision {
        stay: true,
        route_changed: false,
        relays: current_route.to_vec(),
        cost: predicted_rtt,
    }
}

fn leave_next(state: &mut RouteState) {
    state.next = false;
    state.veto = true;
}

fn trace(debug: &mut Option<String>, line: &str) {
    if let Some(buffer) = debug {
        buffer.push_str(line);
        buffer.push('\n');
    }
}

/// Session score: the RTT the player currently experiences, clamped to 999.
/// Lower is better; 999 is the "no data yet" seed.
pub fn session_score(next: bool, direct_rtt: i32, next_rtt: i32) -> u32 {
    let rtt = if next { next_rtt } else { direct_rtt };
    rtt.clamp(0, 999) as u32
}
