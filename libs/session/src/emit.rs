//! Portal and analytics message emission.
//!
//! Emitters run after the response is built. Sends block when a sink is
//! full; back-pressure is surfaced through the session update duration
//! gauge rather than by dropping messages.

use crate::state::{SessionSinks, SessionUpdateState};
use messages::*;
use tracing::debug;

pub async fn emit_messages(state: &mut SessionUpdateState<'_>, sinks: &SessionSinks) {
    emit_fallback(state, sinks).await;

    send_portal_session_update(state, sinks).await;
    send_portal_client_relay_update(state, sinks).await;
    send_portal_server_relay_update(state, sinks).await;

    send_analytics_session_update(state, sinks).await;
    send_analytics_session_summary(state, sinks).await;
    send_analytics_client_relay_pings(state, sinks).await;
    send_analytics_server_relay_pings(state, sinks).await;
}

pub async fn emit_fallback(state: &SessionUpdateState<'_>, sinks: &SessionSinks) {
    if !state.fallback_to_direct {
        return;
    }
    if let Some(sender) = &sinks.fallback_to_direct {
        if sender.send(state.request.session_id).await.is_err() {
            debug!("fallback sink closed");
        }
    }
}

fn relay_samples(pings: &crate::RelayPings) -> Vec<RelaySample> {
    (0..pings.len())
        .map(|i| RelaySample {
            relay_id: pings.ids[i],
            rtt: pings.rtt[i].clamp(0, 255) as u8,
            jitter: pings.jitter[i].clamp(0, 255) as u8,
            packet_loss: pings.packet_loss[i],
            routable: pings.rtt[i] != 255,
        })
        .collect()
}

fn session_flags(state: &SessionUpdateState<'_>) -> SessionFlags {
    let route_state = &state.input.route_state;
    SessionFlags {
        fallback_to_direct: state.request.fallback_to_direct,
        reported: state.request.reported,
        latency_reduction: route_state.reduce_latency,
        packet_loss_reduction: route_state.reduce_packet_loss,
        force_next: route_state.forced_next,
        long_session_update: state.long_session_update,
        client_next_bandwidth_over_limit: state.request.client_next_bandwidth_over_limit,
        server_next_bandwidth_over_limit: state.request.server_next_bandwidth_over_limit,
        veto: route_state.veto,
        disabled: route_state.disabled,
        not_selected: route_state.not_selected,
        a: route_state.a,
        b: route_state.b,
        latency_worse: route_state.latency_worse,
        mispredict: route_state.mispredict,
        lack_of_diversity: route_state.lack_of_diversity,
    }
}

async fn send_portal_session_update(state: &mut SessionUpdateState<'_>, sinks: &SessionSinks) {
    if state.input.slice_number < 1 {
        return;
    }

    // Timed-out slices are suppressed to avoid double counting the end of
    // the session.
    if state.request.client_ping_timed_out {
        return;
    }

    let request = &state.request;
    let mut message = PortalSessionUpdateMessage {
        timestamp: state.current_timestamp,
        client_address: request.client_address.to_string(),
        server_address: request.server_address.to_string(),
        sdk_version_major: request.sdk_version_major,
        sdk_version_minor: request.sdk_version_minor,
        sdk_version_patch: request.sdk_version_patch,
        session_id: request.session_id,
        user_hash: request.user_hash,
        start_time: state.input.start_timestamp,
        buyer_id: request.buyer_id,
        datacenter_id: request.datacenter_id,
        latitude: state.input.latitude,
        longitude: state.input.longitude,
        // Line the slice up with data coming from the SDK.
        slice_number: state.input.slice_number - 1,
        session_events: request.session_events,
        internal_events: request.internal_events,
        connection_type: request.connection_type,
        platform_type: request.platform_type,
        direct_rtt: request.direct_rtt,
        direct_jitter: request.direct_jitter,
        direct_packet_loss: request.direct_packet_loss,
        direct_kbps_up: request.direct_kbps_up,
        direct_kbps_down: request.direct_kbps_down,
        next: request.next,
        real_jitter: state.real_jitter,
        real_packet_loss: state.real_packet_loss,
        real_out_of_order: state.real_out_of_order,
        client_relays: relay_samples(&request.client_relays),
        server_relays: relay_samples(&request.server_relays),
        best_score: state.output.best_score,
        best_direct_rtt: state.output.best_direct_rtt,
        best_next_rtt: state.output.best_next_rtt,
        retry: request.retry_number != 0,
        fallback_to_direct: state.fallback_to_direct,
        send_to_portal: !state.config.portal_next_sessions_only
            || state.output.duration_on_next > 0,
        ..Default::default()
    };

    if message.next {
        message.next_rtt = request.next_rtt;
        message.next_jitter = request.next_jitter;
        message.next_packet_loss = request.next_packet_loss;
        message.next_kbps_up = request.next_kbps_up;
        message.next_kbps_down = request.next_kbps_down;
        message.next_predicted_rtt = state.input.route_cost.max(0) as u32;
        message.next_route_relays = state.input.route_relay_ids.clone();
    }

    if let Some(sender) = &sinks.portal_session_update {
        if sender.send(message).await.is_ok() {
            state.sent_portal_session_update_message = true;
        }
    }
}

async fn send_portal_client_relay_update(
    state: &mut SessionUpdateState<'_>,
    sinks: &SessionSinks,
) {
    // Emit exactly when the latch flips.
    if state.input.sent_client_relays_to_portal || !state.output.sent_client_relays_to_portal {
        return;
    }

    let message = PortalClientRelayUpdateMessage {
        timestamp: state.current_timestamp,
        buyer_id: state.request.buyer_id,
        session_id: state.output.session_id,
        client_relays: relay_samples(&state.request.client_relays),
    };

    if let Some(sender) = &sinks.portal_client_relay_update {
        if sender.send(message).await.is_ok() {
            state.sent_portal_client_relay_update_message = true;
        }
    }
}

async fn send_portal_server_relay_update(
    state: &mut SessionUpdateState<'_>,
    sinks: &SessionSinks,
) {
    if state.input.sent_server_relays_to_portal || !state.output.sent_server_relays_to_portal {
        return;
    }

    let message = PortalServerRelayUpdateMessage {
        timestamp: state.current_timestamp,
        buyer_id: state.request.buyer_id,
        session_id: state.output.session_id,
        server_relays: relay_samples(&state.request.server_relays),
    };

    if let Some(sender) = &sinks.portal_server_relay_update {
        if sender.send(message).await.is_ok() {
            state.sent_portal_server_relay_update_message = true;
        }
    }
}

async fn send_analytics_session_update(state: &mut SessionUpdateState<'_>, sinks: &SessionSinks) {
    if state.request.slice_number < 1 {
        return;
    }

    let request = &state.request;
    let mut message = AnalyticsSessionUpdateMessage {
        timestamp: (state.current_timestamp_nanos / 1000) as i64,
        session_id: request.session_id,
        // Line the slice up with data coming from the SDK.
        slice_number: request.slice_number - 1,
        real_packet_loss: state.real_packet_loss,
        real_jitter: state.real_jitter,
        real_out_of_order: state.real_out_of_order,
        session_events: request.session_events,
        internal_events: request.internal_events,
        direct_rtt: request.direct_rtt,
        direct_jitter: request.direct_jitter,
        direct_packet_loss: request.direct_packet_loss,
        direct_kbps_up: request.direct_kbps_up,
        direct_kbps_down: request.direct_kbps_down,
        next: request.next,
        flags: session_flags(state),
        ..Default::default()
    };

    if message.next {
        message.next_rtt = request.next_rtt;
        message.next_jitter = request.next_jitter;
        message.next_packet_loss = request.next_packet_loss;
        message.next_kbps_up = request.next_kbps_up;
        message.next_kbps_down = request.next_kbps_down;
        message.next_predicted_rtt = state.input.route_cost as f32;
        message.next_route_relays = state.input.route_relay_ids.clone();
    }

    if let Some(sender) = &sinks.analytics_session_update {
        if sender.send(message).await.is_ok() {
            state.sent_analytics_session_update_message = true;
        }
    }
}

async fn send_analytics_session_summary(state: &mut SessionUpdateState<'_>, sinks: &SessionSinks) {
    // The summary latch: emitted exactly in the transition where
    // write_summary is set on the output.
    if !state.output.write_summary {
        return;
    }

    let request = &state.request;
    let message = AnalyticsSessionSummaryMessage {
        timestamp: (state.current_timestamp_nanos / 1000) as i64,
        session_id: request.session_id,
        datacenter_id: request.datacenter_id,
        buyer_id: request.buyer_id,
        user_hash: request.user_hash,
        latitude: state.input.latitude,
        longitude: state.input.longitude,
        client_address: request.client_address.to_string(),
        server_address: request.server_address.to_string(),
        connection_type: request.connection_type,
        platform_type: request.platform_type,
        sdk_version_major: request.sdk_version_major,
        sdk_version_minor: request.sdk_version_minor,
        sdk_version_patch: request.sdk_version_patch,
        client_to_server_packets_sent: request.packets_sent_client_to_server,
        server_to_client_packets_sent: request.packets_sent_server_to_client,
        client_to_server_packets_lost: request.packets_lost_client_to_server,
        server_to_client_packets_lost: request.packets_lost_server_to_client,
        client_to_server_packets_out_of_order: request.packets_out_of_order_client_to_server,
        server_to_client_packets_out_of_order: request.packets_out_of_order_server_to_client,
        session_duration: request.slice_number.saturating_sub(1) * types::SLICE_SECONDS as u32,
        total_next_envelope_bytes_up: state.input.next_envelope_bytes_up_sum,
        total_next_envelope_bytes_down: state.input.next_envelope_bytes_down_sum,
        duration_on_next: state.input.duration_on_next,
        start_timestamp: (state.input.start_timestamp * 1_000_000) as i64,
        error: state.input.error | state.error,
        flags: session_flags(state),
    };

    if let Some(sender) = &sinks.analytics_session_summary {
        if sender.send(message).await.is_ok() {
            state.sent_analytics_session_summary_message = true;
        }
    }
}

async fn send_analytics_client_relay_pings(
    state: &mut SessionUpdateState<'_>,
    sinks: &SessionSinks,
) {
    // Client relay stats are uploaded on slice 1 only.
    if state.request.slice_number != 1 {
        return;
    }

    let Some(sender) = &sinks.analytics_client_relay_ping else {
        return;
    };

    let request = &state.request;
    let pings: Vec<AnalyticsClientRelayPingMessage> = (0..request.client_relays.len())
        .map(|i| AnalyticsClientRelayPingMessage {
            timestamp: (state.current_timestamp_nanos / 1000) as i64,
            buyer_id: request.buyer_id,
            session_id: state.output.session_id,
            user_hash: request.user_hash,
            latitude: state.output.latitude,
            longitude: state.output.longitude,
            client_address: request.client_address.to_string(),
            connection_type: request.connection_type,
            platform_type: request.platform_type,
            client_relay_id: request.client_relays.ids[i],
            client_relay_rtt: request.client_relays.rtt[i],
            client_relay_jitter: request.client_relays.jitter[i],
            client_relay_packet_loss: request.client_relays.packet_loss[i],
        })
        .collect();

    for message in pings {
        if sender.send(message).await.is_ok() {
            state.sent_analytics_client_relay_ping_message = true;
        }
    }
}

async fn send_analytics_server_relay_pings(
    state: &mut SessionUpdateState<'_>,
    sinks: &SessionSinks,
) {
    if state.request.slice_number != 1 {
        return;
    }

    let Some(sender) = &sinks.analytics_server_relay_ping else {
        return;
    };

    let request = &state.request;
    let pings: Vec<AnalyticsServerRelayPingMessage> = (0..request.server_relays.len())
        .map(|i| AnalyticsServerRelayPingMessage {
            timestamp: (state.current_timestamp_nanos / 1000) as i64,
            buyer_id: request.buyer_id,
            datacenter_id: request.datacenter_id,
            server_relay_id: request.server_relays.ids[i],
            server_relay_rtt: request.server_relays.rtt[i],
            server_relay_jitter: request.server_relays.jitter[i],
            server_relay_packet_loss: request.server_relays.packet_loss[i],
        })
        .collect();

    for message in pings {
        if sender.send(message).await.is_ok() {
            state.sent_analytics_server_relay_ping_message = true;
        }
    }
}
