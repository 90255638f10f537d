//! The session update pipeline stages.
//!
//! Stage order per update:
//!
//! 1. [`pre`]: read and verify carried session data, track scores, gate on
//!    terminal states and freshness.
//! 2. [`new_session`] / [`existing_session`]: state transition into the
//!    current slice.
//! 3. [`update_client_relays`] / [`update_server_relays`]: reframe relay
//!    ids against the live route matrix and maintain exclusions.
//! 4. [`make_route_decision`]: direct vs. accelerated, token minting.
//! 5. [`post`]: error accumulation, counters, summary latch, response
//!    serialization and signing.
//! 6. message emission (see [`crate::emit`]).
//!
//! Request-local failures set a bit in the session error mask and the slice
//! responds direct; they are expected traffic and log at debug level only.

use crate::emit;
use crate::state::{SessionSinks, SessionUpdateState};
use crate::SessionData;
use codec::WriteStream;
use tokens::TokenNode;
use tracing::{debug, warn};
use types::*;

/// Verify and decode the session data carried in the request.
pub fn read_session_data(state: &mut SessionUpdateState<'_>) -> bool {
    if state.read_session_data {
        return true;
    }

    let data = &state.request.session_data[..state.request.session_data_bytes as usize];

    if !crypto::verify(
        data,
        &state.config.server_backend_public_key,
        &state.request.session_data_signature,
    ) {
        debug!("session data signature check failed");
        state.error |= SESSION_ERROR_SIGNATURE_CHECK_FAILED;
        return false;
    }

    match SessionData::deserialize(data) {
        Ok(input) => {
            state.input = input;
            state.read_session_data = true;
            true
        }
        Err(e) => {
            debug!("failed to read session data: {e}");
            state.error |= SESSION_ERROR_FAILED_TO_READ_SESSION_DATA;
            false
        }
    }
}

/// Returns true when the rest of the pipeline (relay stages, route
/// decision) should be skipped and the slice goes direct.
pub fn pre(state: &mut SessionUpdateState<'_>) -> bool {
    // The carried state is always read first: the output is built from it
    // even when this slice ends up skipped.
    if state.request.slice_number != 0 && !read_session_data(state) {
        return true;
    }

    // Track the best score seen per session to keep portal ordering stable.
    // Lower is better.
    let score = routing::session_score(
        state.request.next,
        state.request.direct_rtt as i32,
        state.request.next_rtt as i32,
    );
    if state.request.slice_number >= 1 {
        if score < state.input.best_score {
            state.input.best_score = score;
            state.input.best_direct_rtt = (state.request.direct_rtt as u32).min(1000);
            state.input.best_next_rtt = (state.request.next_rtt as u32).min(1000);
        }
    } else {
        state.input.best_score = 999;
    }

    // The SDK hit a fatal condition; the session is direct from here on.
    if state.request.fallback_to_direct {
        if state.input.error & SESSION_ERROR_FALLBACK_TO_DIRECT == 0 {
            warn!("fallback to direct [{:016x}]", state.request.session_id);
        }
        state.error |= SESSION_ERROR_FALLBACK_TO_DIRECT;
        state.fallback_to_direct = true;
        return true;
    }

    if state.buyer.route_shader.analysis_only {
        debug!("analysis only");
        state.analysis_only = true;
        return true;
    }

    if state.buyer.route_shader.disable_network_next {
        debug!("network next disabled for buyer");
        state.input.route_state.disabled = true;
        return true;
    }

    if state.request.client_ping_timed_out {
        debug!("client ping timed out");
        state.client_ping_timed_out = true;
        return true;
    }

    // Routing off an old matrix risks sending players across routes that
    // are worse than their default internet path.
    if state.route_matrix.created_at + state.config.stale_duration.as_secs()
        < state.current_timestamp
    {
        debug!("stale route matrix");
        state.error |= SESSION_ERROR_STALE_ROUTE_MATRIX;
        return true;
    }

    if !state.database.datacenter_exists(state.request.datacenter_id) {
        debug!("unknown datacenter {:016x}", state.request.datacenter_id);
        state.error |= SESSION_ERROR_UNKNOWN_DATACENTER;
    }

    if !state
        .database
        .datacenter_enabled(state.request.buyer_id, state.request.datacenter_id)
    {
        debug!(
            "datacenter not enabled: {:016x}, {:016x}",
            state.request.buyer_id, state.request.datacenter_id
        );
        state.error |= SESSION_ERROR_DATACENTER_NOT_ENABLED;
    }

    let dest_relay_ids = state.database.datacenter_relays(state.request.datacenter_id);
    if dest_relay_ids.is_empty() {
        debug!("no relays in datacenter {:016x}", state.request.datacenter_id);
        state.error |= SESSION_ERROR_NO_RELAYS_IN_DATACENTER;
    }
    state.dest_relay_ids = dest_relay_ids.to_vec();

    if state.buyer.debug {
        state.debug = Some(String::new());
    }

    false
}

pub fn new_session(state: &mut SessionUpdateState<'_>) {
    debug!("new session");

    state.input.version = SESSION_DATA_VERSION_WRITE;
    state.input.session_id = state.request.session_id;
    state.input.slice_number = 0;
    state.input.start_timestamp = state.current_timestamp;
    state.input.expire_timestamp = state.current_timestamp;
    state.input.route_state.ab_test = state.buyer.route_shader.ab_test;

    state.output = state.input.clone();
    state.output.slice_number = 1;
    state.output.expire_timestamp = state.input.expire_timestamp + SLICE_SECONDS * 2 + 1;
}

pub fn existing_session(state: &mut SessionUpdateState<'_>) {
    debug!("existing session");

    // Obviously divergent data between the request and the stored session
    // data rejects this slice; the response goes direct.
    if state.input.session_id != state.request.session_id {
        debug!("bad session id");
        state.error |= SESSION_ERROR_BAD_SESSION_ID;
        state.output = state.input.clone();
        return;
    }

    if state.input.slice_number != state.request.slice_number {
        debug!("bad slice number");
        state.error |= SESSION_ERROR_BAD_SLICE_NUMBER;
        state.output = state.input.clone();
        return;
    }

    state.output = state.input.clone();
    state.output.slice_number += 1;
    state.output.expire_timestamp += SLICE_SECONDS;

    // Envelope bandwidth totals while on next.
    if state.request.next {
        let shader = &state.buyer.route_shader;
        state.output.next_envelope_bytes_up_sum +=
            shader.bandwidth_envelope_up_kbps as u64 * 1000 * SLICE_SECONDS / 8;
        state.output.next_envelope_bytes_down_sum +=
            shader.bandwidth_envelope_down_kbps as u64 * 1000 * SLICE_SECONDS / 8;
    }

    // Differential real packet loss: driven by actual game packets, much
    // higher precision than the 10HZ ping packets.
    let sent_c2s = state
        .request
        .packets_sent_client_to_server
        .wrapping_sub(state.input.prev_packets_sent_client_to_server);
    let sent_s2c = state
        .request
        .packets_sent_server_to_client
        .wrapping_sub(state.input.prev_packets_sent_server_to_client);
    let lost_c2s = state
        .request
        .packets_lost_client_to_server
        .wrapping_sub(state.input.prev_packets_lost_client_to_server);
    let lost_s2c = state
        .request
        .packets_lost_server_to_client
        .wrapping_sub(state.input.prev_packets_lost_server_to_client);
    let out_of_order_c2s = state
        .request
        .packets_out_of_order_client_to_server
        .wrapping_sub(state.input.prev_packets_out_of_order_client_to_server);
    let out_of_order_s2c = state
        .request
        .packets_out_of_order_server_to_client
        .wrapping_sub(state.input.prev_packets_out_of_order_server_to_client);

    let loss_c2s = percentage(lost_c2s, sent_c2s);
    let loss_s2c = percentage(lost_s2c, sent_s2c);
    state.real_packet_loss = loss_c2s.max(loss_s2c);

    let ooo_c2s = percentage(out_of_order_c2s, sent_c2s);
    let ooo_s2c = percentage(out_of_order_s2c, sent_s2c);
    state.real_out_of_order = ooo_c2s.max(ooo_s2c);

    // Real jitter, clamped at 1000. It is meaningless beyond that.
    let jitter_c2s = state.request.jitter_client_to_server.min(1000.0);
    let jitter_s2c = state.request.jitter_server_to_client.min(1000.0);
    state.real_jitter = jitter_c2s.max(jitter_s2c);
}

fn percentage(part: u64, whole: u64) -> f32 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0) as f32
    }
}

pub fn update_client_relays(state: &mut SessionUpdateState<'_>) -> bool {
    if state.buyer.route_shader.analysis_only {
        debug!("analysis only, not updating client relay stats");
        state.not_updating_client_relays_analysis_only = true;
        return false;
    }

    if state.error & SESSION_ERROR_DATACENTER_NOT_ENABLED != 0 {
        debug!("datacenter not enabled, not updating client relay stats");
        state.not_updating_client_relays_datacenter_not_enabled = true;
        return false;
    }

    state.dest_relays =
        routing::reframe_dest_relays(state.route_matrix.relay_index_map(), &state.dest_relay_ids);

    let direct_rtt = state.request.direct_rtt.ceil() as i32;
    let direct_jitter = state.request.direct_jitter.ceil() as i32;
    let direct_packet_loss = state.request.direct_max_packet_loss_seen;

    routing::filter_source_relays(
        direct_rtt,
        direct_jitter,
        direct_packet_loss,
        &state.request.client_relays.rtt,
        &state.request.client_relays.jitter,
        &state.request.client_relays.packet_loss,
        state.request.slice_number == 1,
        &mut state.output.exclude_client_relay,
    );

    let filtered_rtt = routing::apply_exclusion(
        &state.request.client_relays.rtt,
        &state.output.exclude_client_relay,
    );

    let (source_relays, source_relay_rtt) = routing::reframe_source_relays(
        state.route_matrix.relay_index_map(),
        &state.request.client_relays.ids,
        &filtered_rtt,
    );
    state.source_relays = source_relays;
    state.source_relay_rtt = source_relay_rtt;

    true
}

pub fn update_server_relays(state: &mut SessionUpdateState<'_>) -> bool {
    if state.buyer.route_shader.analysis_only {
        debug!("analysis only, not updating server relay stats");
        state.not_updating_server_relays_analysis_only = true;
        return false;
    }

    if state.error & SESSION_ERROR_DATACENTER_NOT_ENABLED != 0 {
        debug!("datacenter not enabled, not updating server relay stats");
        state.not_updating_server_relays_datacenter_not_enabled = true;
        return false;
    }

    if state.request.slice_number == 1 {
        debug!(
            "sdk uploaded server relay stats for {} relays",
            state.request.server_relays.len()
        );
    }

    true
}

fn build_next_tokens(state: &mut SessionUpdateState<'_>, route_relays: &[u32]) {
    state.output.session_version = state.output.session_version.wrapping_add(1);

    let client_cipher = match crypto::TokenCipher::new(
        &state.config.relay_backend_private_key,
        &state.request.client_route_public_key,
    ) {
        Ok(cipher) => cipher,
        Err(e) => {
            debug!("bad client route public key: {e}");
            return;
        }
    };
    let server_cipher = match crypto::TokenCipher::new(
        &state.config.relay_backend_private_key,
        &state.request.server_route_public_key,
    ) {
        Ok(cipher) => cipher,
        Err(e) => {
            debug!("bad server route public key: {e}");
            return;
        }
    };

    // Client port is zeroed; the first relay fills in the observed port.
    let mut client_address = state.request.client_address;
    client_address.set_port(0);

    let mut nodes = Vec::with_capacity(route_relays.len() + 2);
    nodes.push(TokenNode::endpoint(Some(client_address), &client_cipher));

    for &relay_index in route_relays {
        let relay_id = state.route_matrix.relay_ids[relay_index as usize];
        let (Some(relay), Some(cipher)) = (
            state.database.relay(relay_id),
            state.database.relay_secret_key(relay_id),
        ) else {
            debug!("route relay {relay_id:016x} missing from database");
            state.error |= SESSION_ERROR_ROUTE_RELAY_NO_LONGER_EXISTS;
            return;
        };
        nodes.push(TokenNode {
            address: Some(relay.public_address),
            internal_address: relay.internal_address,
            internal_group: relay.internal_group,
            seller_id: relay.seller_id,
            cipher,
        });
    }

    nodes.push(TokenNode::endpoint(Some(state.from), &server_cipher));

    let num_tokens = nodes.len();
    let mut token_data = vec![0u8; num_tokens * ENCRYPTED_ROUTE_TOKEN_BYTES];

    let shader = &state.buyer.route_shader;
    if let Err(e) = tokens::write_route_tokens(
        &mut token_data,
        state.output.expire_timestamp,
        state.output.session_id,
        state.output.session_version,
        shader.bandwidth_envelope_up_kbps as u32,
        shader.bandwidth_envelope_down_kbps as u32,
        &nodes,
    ) {
        debug!("failed to write route tokens: {e}");
        return;
    }

    state.response.route_type = ROUTE_TYPE_NEW;
    state.response.num_tokens = num_tokens as u8;
    state.response.tokens = token_data;
}

fn build_continue_tokens(state: &mut SessionUpdateState<'_>, route_relays: &[u32]) {
    let client_cipher = match crypto::TokenCipher::new(
        &state.config.relay_backend_private_key,
        &state.request.client_route_public_key,
    ) {
        Ok(cipher) => cipher,
        Err(e) => {
            debug!("bad client route public key: {e}");
            return;
        }
    };
    let server_cipher = match crypto::TokenCipher::new(
        &state.config.relay_backend_private_key,
        &state.request.server_route_public_key,
    ) {
        Ok(cipher) => cipher,
        Err(e) => {
            debug!("bad server route public key: {e}");
            return;
        }
    };

    let mut ciphers = Vec::with_capacity(route_relays.len() + 2);
    ciphers.push(&client_cipher);
    for &relay_index in route_relays {
        let relay_id = state.route_matrix.relay_ids[relay_index as usize];
        let Some(cipher) = state.database.relay_secret_key(relay_id) else {
            debug!("route relay {relay_id:016x} missing from database");
            state.error |= SESSION_ERROR_ROUTE_RELAY_NO_LONGER_EXISTS;
            return;
        };
        ciphers.push(cipher);
    }
    ciphers.push(&server_cipher);

    let num_tokens = ciphers.len();
    let mut token_data = vec![0u8; num_tokens * ENCRYPTED_CONTINUE_TOKEN_BYTES];

    if let Err(e) = tokens::write_continue_tokens(
        &mut token_data,
        state.output.expire_timestamp,
        state.output.session_id,
        state.output.session_version,
        &ciphers,
    ) {
        debug!("failed to write continue tokens: {e}");
        return;
    }

    state.response.route_type = ROUTE_TYPE_CONTINUE;
    state.response.num_tokens = num_tokens as u8;
    state.response.tokens = token_data;
}

pub fn make_route_decision(state: &mut SessionUpdateState<'_>) {
    // On network next with no relays in the route is broken state: veto.
    if state.input.route_state.next && state.input.route_relay_ids.is_empty() {
        debug!("on network next, but no route relays");
        state.output.route_state.next = false;
        state.output.route_state.veto = true;
        state.error |= SESSION_ERROR_NO_ROUTE_RELAYS;
        if let Some(trace) = &mut state.debug {
            trace.push_str("no route relays\n");
        }
        return;
    }

    let mut route_cost: i32 = 0;
    let mut route_changed = false;
    let mut route_relays: Vec<u32> = Vec::new();

    if !state.input.route_state.next {
        // Currently direct. Should we take network next?
        let candidate = routing::take_network_next(
            state.route_matrix,
            &state.buyer.route_shader,
            &mut state.output.route_state,
            state.request.user_hash,
            state.request.direct_rtt as i32,
            state.real_packet_loss,
            state.request.direct_packet_loss,
            state.real_jitter,
            &state.source_relays,
            &state.source_relay_rtt,
            &state.dest_relays,
            &mut state.route_diversity,
            &mut state.debug,
        );

        if let Some(candidate) = candidate {
            state.take_network_next = true;
            route_cost = candidate.cost;
            route_relays = candidate.relays;
            build_next_tokens(state, &route_relays);
        } else {
            state.stay_direct = true;
        }
    } else {
        // Currently on network next.
        if !state.request.next {
            debug!("aborted");
            state.output.route_state.next = false;
            state.output.route_state.veto = true;
            state.error |= SESSION_ERROR_ABORTED;
            if let Some(trace) = &mut state.debug {
                trace.push_str("aborted\n");
            }
            return;
        }

        // Reframe the current route against the live matrix.
        let current_route = match routing::reframe_route(
            state.route_matrix.relay_index_map(),
            &state.output.route_relay_ids,
        ) {
            Some(route) => route,
            None => {
                debug!("one or more relays in the route no longer exist");
                state.error |= SESSION_ERROR_ROUTE_RELAY_NO_LONGER_EXISTS;
                Vec::new()
            }
        };

        let decision = routing::stay_on_network_next(
            state.route_matrix,
            &state.buyer.route_shader,
            &mut state.output.route_state,
            state.request.direct_rtt as i32,
            state.request.next_rtt as i32,
            state.input.route_cost,
            &current_route,
            &state.source_relays,
            &state.source_relay_rtt,
            &state.dest_relays,
            &mut state.debug,
        );

        if decision.stay {
            route_cost = decision.cost;
            route_relays = decision.relays;
            route_changed = decision.route_changed;
            if decision.route_changed {
                debug!("route changed");
                state.route_changed = true;
                build_next_tokens(state, &route_relays);
            } else {
                debug!("route continued");
                state.route_continued = true;
                build_continue_tokens(state, &route_relays);
            }
        } else {
            if state.output.route_state.no_route {
                debug!("route no longer exists");
                state.error |= SESSION_ERROR_ROUTE_NO_LONGER_EXISTS;
            }
            if state.output.route_state.mispredict {
                debug!("mispredict");
            }
            if state.output.route_state.latency_worse {
                debug!("latency worse");
            }
        }
    }

    state.response.multipath = state.output.route_state.multipath;

    // The route data goes back to the SDK inside session data so the next
    // slice can be planned against it.
    route_cost = route_cost.min(MAX_ROUTE_COST);

    if let Some(trace) = &mut state.debug {
        if route_cost != 0 {
            trace.push_str(&format!("route cost is {route_cost}\n"));
        }
    }

    state.output.route_cost = route_cost;
    state.output.route_changed = route_changed;
    state.output.route_relay_ids = route_relays
        .iter()
        .map(|&index| state.route_matrix.relay_ids[index as usize])
        .collect();
}

pub fn post(state: &mut SessionUpdateState<'_>) {
    // Portal relay latches. At scale only next sessions go to the portal,
    // so the latch may wait for the first accelerated slice.
    let should_send_relays = state.input.slice_number >= 1
        && (!state.config.portal_next_sessions_only || state.output.route_state.next);

    if !state.input.sent_client_relays_to_portal && should_send_relays {
        state.output.sent_client_relays_to_portal = true;
    }
    if !state.input.sent_server_relays_to_portal && should_send_relays {
        state.output.sent_server_relays_to_portal = true;
    }

    // Accumulate error flags across the session's life; the summary writes
    // them once at session end.
    state.output.error = state.input.error | state.error;

    for bit in session_error_bits(state.error) {
        metrics::counter!("session_errors_total", "kind" => session_error_name(bit)).increment(1);
    }

    if state.request.slice_number == 0 {
        debug!("first slice always goes direct");
    }

    if state.response.route_type != ROUTE_TYPE_DIRECT {
        debug!("session takes network next");
    } else {
        debug!("session goes direct");
    }

    if state.input.route_state.next {
        state.output.duration_on_next += SLICE_SECONDS as u32;
        debug!(
            "session has been on network next for {} seconds",
            state.output.duration_on_next
        );
    }

    // Store this slice's counters so the next slice can take deltas.
    state.output.prev_packets_sent_client_to_server =
        state.request.packets_sent_client_to_server;
    state.output.prev_packets_sent_server_to_client =
        state.request.packets_sent_server_to_client;
    state.output.prev_packets_lost_client_to_server =
        state.request.packets_lost_client_to_server;
    state.output.prev_packets_lost_server_to_client =
        state.request.packets_lost_server_to_client;
    state.output.prev_packets_out_of_order_client_to_server =
        state.request.packets_out_of_order_client_to_server;
    state.output.prev_packets_out_of_order_server_to_client =
        state.request.packets_out_of_order_server_to_client;

    // The session ends on client timeout or fallback. The summary is
    // written exactly once, via a two-step latch so a retried final slice
    // cannot double-write it.
    if state.request.client_ping_timed_out || state.request.fallback_to_direct {
        if !state.output.wrote_summary && !state.output.write_summary {
            state.output.write_summary = true;
        } else if state.output.write_summary && !state.output.wrote_summary {
            state.output.wrote_summary = true;
            state.output.write_summary = false;
        }
    }

    // Serialize, sign, and frame the response.
    let mut session_data = [0u8; MAX_SESSION_DATA_SIZE];
    let session_data_bytes = match state.output.serialize(&mut session_data) {
        Ok(written) => written,
        Err(e) => {
            tracing::error!("failed to write session data: {e}");
            state.error |= SESSION_ERROR_FAILED_TO_WRITE_SESSION_DATA;
            return;
        }
    };

    let signature = match crypto::sign(
        &session_data[..session_data_bytes],
        &state.config.server_backend_private_key,
    ) {
        Ok(signature) => signature,
        Err(e) => {
            tracing::error!("failed to sign session data: {e}");
            state.error |= SESSION_ERROR_FAILED_TO_WRITE_SESSION_DATA;
            return;
        }
    };

    state.response.session_id = state.request.session_id;
    state.response.slice_number = state.request.slice_number + 1;
    state.response.session_data[..session_data_bytes]
        .copy_from_slice(&session_data[..session_data_bytes]);
    state.response.session_data_bytes = session_data_bytes as u32;
    state.response.session_data_signature = signature;

    let mut payload = vec![0u8; MAX_PACKET_BYTES];
    let mut stream = WriteStream::new(&mut payload);
    if let Err(e) = state.response.write(&mut stream) {
        tracing::error!("failed to write session update response packet: {e}");
        state.error |= SESSION_ERROR_FAILED_TO_WRITE_RESPONSE_PACKET;
        return;
    }
    let payload_bytes = stream.bytes_processed();

    let mut packet = vec![0u8; MAX_PACKET_BYTES];
    match crate::packets::write_packet(
        SESSION_UPDATE_RESPONSE_PACKET,
        &payload[..payload_bytes],
        &state.config.server_backend_address,
        &state.from,
        &state.config.server_backend_private_key,
        &mut packet,
    ) {
        Ok(written) => {
            packet.truncate(written);
            state.response_packet = packet;
            state.wrote_response_packet = true;
        }
        Err(e) => {
            tracing::error!("failed to write session update response packet: {e}");
            state.error |= SESSION_ERROR_FAILED_TO_WRITE_RESPONSE_PACKET;
        }
    }
}

/// Run the whole pipeline for one request and emit downstream messages.
pub async fn session_update(state: &mut SessionUpdateState<'_>, sinks: &SessionSinks) {
    let started = std::time::Instant::now();

    let stop = pre(state);

    if state.request.slice_number == 0 {
        state.first_update = true;
        new_session(state);
    } else {
        existing_session(state);
    }

    let session_mismatch =
        state.error & (SESSION_ERROR_BAD_SESSION_ID | SESSION_ERROR_BAD_SLICE_NUMBER) != 0;

    // The first slice always goes direct: there are no relay pings yet.
    if !stop && !session_mismatch && !state.first_update {
        update_client_relays(state);
        update_server_relays(state);
        make_route_decision(state);
    }

    post(state);

    let elapsed = started.elapsed();
    metrics::gauge!("session_update_duration_seconds").set(elapsed.as_secs_f64());
    if elapsed.as_secs() >= 1 {
        warn!("long session update: {elapsed:?}");
        state.long_session_update = true;
    }

    if !state.first_update {
        emit::emit_messages(state, sinks).await;
    } else if state.fallback_to_direct {
        emit::emit_fallback(state, sinks).await;
    }
}
