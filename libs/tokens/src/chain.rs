//! Token chains: one record per node along a route.

use crate::{ContinueToken, RouteToken, TokenError, TokenResult};
use crypto::TokenCipher;
use std::net::SocketAddr;
use types::{ENCRYPTED_CONTINUE_TOKEN_BYTES, ENCRYPTED_ROUTE_TOKEN_BYTES};

/// One node along a route, in order: client, relays, server.
pub struct TokenNode<'a> {
    /// Public address. The client node carries its address with port zero;
    /// the first relay replaces it with the observed source port.
    pub address: Option<SocketAddr>,
    pub internal_address: Option<SocketAddr>,
    pub internal_group: u64,
    pub seller_id: u64,
    pub cipher: &'a TokenCipher,
}

impl<'a> TokenNode<'a> {
    /// Client and server endpoints: no internal addressing, no seller.
    pub fn endpoint(address: Option<SocketAddr>, cipher: &'a TokenCipher) -> Self {
        Self {
            address,
            internal_address: None,
            internal_group: 0,
            seller_id: 0,
            cipher,
        }
    }
}

/// The address of `target` as seen from `from`: internal when both nodes
/// belong to the same seller, share an internal group, and both advertise
/// an internal address.
fn resolve_link(target: &TokenNode<'_>, from: &TokenNode<'_>) -> (Option<SocketAddr>, bool) {
    let internal = target.seller_id == from.seller_id
        && target.seller_id != 0
        && target.internal_group == from.internal_group
        && target.internal_address.is_some()
        && from.internal_address.is_some();
    if internal {
        (target.internal_address, true)
    } else {
        (target.address, false)
    }
}

/// Mint one route token per node into `output`.
///
/// `output` must hold `nodes.len() * ENCRYPTED_ROUTE_TOKEN_BYTES`; returns
/// the number of bytes written.
#[allow(clippy::too_many_arguments)]
pub fn write_route_tokens(
    output: &mut [u8],
    expire_timestamp: u64,
    session_id: u64,
    session_version: u8,
    envelope_up_kbps: u32,
    envelope_down_kbps: u32,
    nodes: &[TokenNode<'_>],
) -> TokenResult<usize> {
    let need = nodes.len() * ENCRYPTED_ROUTE_TOKEN_BYTES;
    if output.len() < need {
        return Err(TokenError::BufferTooSmall {
            need,
            got: output.len(),
        });
    }

    for (i, node) in nodes.iter().enumerate() {
        let (prev_address, prev_internal) = if i == 0 {
            (node.address, false)
        } else {
            resolve_link(&nodes[i - 1], node)
        };
        let (next_address, next_internal) = if i == nodes.len() - 1 {
            (node.address, false)
        } else {
            resolve_link(&nodes[i + 1], node)
        };
        let next_same_group = i + 1 < nodes.len()
            && node.seller_id != 0
            && node.seller_id == nodes[i + 1].seller_id
            && node.internal_group == nodes[i + 1].internal_group;

        let token = RouteToken {
            expire_timestamp,
            session_id,
            session_version,
            envelope_up_kbps,
            envelope_down_kbps,
            prev_internal,
            next_internal,
            next_same_group,
            prev_address,
            next_address,
        };

        let start = i * ENCRYPTED_ROUTE_TOKEN_BYTES;
        token.encrypt(node.cipher, &mut output[start..start + ENCRYPTED_ROUTE_TOKEN_BYTES])?;
    }

    Ok(need)
}

/// Mint one continue token per node into `output`.
pub fn write_continue_tokens(
    output: &mut [u8],
    expire_timestamp: u64,
    session_id: u64,
    session_version: u8,
    ciphers: &[&TokenCipher],
) -> TokenResult<usize> {
    let need = ciphers.len() * ENCRYPTED_CONTINUE_TOKEN_BYTES;
    if output.len() < need {
        return Err(TokenError::BufferTooSmall {
            need,
            got: output.len(),
        });
    }

    let token = ContinueToken {
        expire_timestamp,
        session_id,
        session_version,
    };

    for (i, cipher) in ciphers.iter().enumerate() {
        let start = i * ENCRYPTED_CONTINUE_TOKEN_BYTES;
        token.encrypt(cipher, &mut output[start..start + ENCRYPTED_CONTINUE_TOKEN_BYTES])?;
    }

    Ok(need)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Keys {
        backend_private: [u8; 32],
        backend_public: [u8; 32],
        node_publics: Vec<[u8; 32]>,
        node_privates: Vec<[u8; 32]>,
    }

    fn keys(n: usize) -> Keys {
        let (backend_public, backend_private) = crypto::generate_box_keypair();
        let mut node_publics = Vec::new();
        let mut node_privates = Vec::new();
        for _ in 0..n {
            let (public, private) = crypto::generate_box_keypair();
            node_publics.push(public);
            node_privates.push(private);
        }
        Keys {
            backend_private,
            backend_public,
            node_publics,
            node_privates,
        }
    }

    #[test]
    fn route_chain_addresses_line_up() {
        let keys = keys(4);
        let ciphers: Vec<TokenCipher> = keys
            .node_publics
            .iter()
            .map(|public| TokenCipher::new(&keys.backend_private, public).unwrap())
            .collect();

        let client: SocketAddr = "100.0.0.1:0".parse().unwrap();
        let relay_a: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let relay_b: SocketAddr = "10.0.0.2:40000".parse().unwrap();
        let server: SocketAddr = "200.0.0.1:50000".parse().unwrap();

        let nodes = vec![
            TokenNode::endpoint(Some(client), &ciphers[0]),
            TokenNode {
                address: Some(relay_a),
                internal_address: None,
                internal_group: 0,
                seller_id: 1,
                cipher: &ciphers[1],
            },
            TokenNode {
                address: Some(relay_b),
                internal_address: None,
                internal_group: 0,
                seller_id: 2,
                cipher: &ciphers[2],
            },
            TokenNode::endpoint(Some(server), &ciphers[3]),
        ];

        let mut output = vec![0u8; 4 * ENCRYPTED_ROUTE_TOKEN_BYTES];
        let written =
            write_route_tokens(&mut output, 123, 42, 1, 1024, 2048, &nodes).unwrap();
        assert_eq!(written, 4 * ENCRYPTED_ROUTE_TOKEN_BYTES);

        // Each node decrypts only its own record.
        for (i, private) in keys.node_privates.iter().enumerate() {
            let node_cipher = TokenCipher::new(private, &keys.backend_public).unwrap();
            let record = &output[i * ENCRYPTED_ROUTE_TOKEN_BYTES..][..ENCRYPTED_ROUTE_TOKEN_BYTES];
            let token = RouteToken::decrypt(&node_cipher, record).unwrap();
            assert_eq!(token.session_id, 42);
            assert_eq!(token.envelope_up_kbps, 1024);

            let expected_prev = [client, client, relay_a, relay_b][i];
            let expected_next = [relay_a, relay_b, server, server][i];
            assert_eq!(token.prev_address, Some(expected_prev));
            assert_eq!(token.next_address, Some(expected_next));
            assert!(!token.prev_internal);
            assert!(!token.next_internal);
        }
    }

    #[test]
    fn internal_addressing_swaps_in_for_grouped_relays() {
        let keys = keys(4);
        let ciphers: Vec<TokenCipher> = keys
            .node_publics
            .iter()
            .map(|public| TokenCipher::new(&keys.backend_private, public).unwrap())
            .collect();

        let relay_a_public: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        let relay_a_internal: SocketAddr = "192.168.0.1:40000".parse().unwrap();
        let relay_b_public: SocketAddr = "10.0.0.2:40000".parse().unwrap();
        let relay_b_internal: SocketAddr = "192.168.0.2:40000".parse().unwrap();

        let nodes = vec![
            TokenNode::endpoint(Some("100.0.0.1:0".parse().unwrap()), &ciphers[0]),
            TokenNode {
                address: Some(relay_a_public),
                internal_address: Some(relay_a_internal),
                internal_group: 7,
                seller_id: 1,
                cipher: &ciphers[1],
            },
            TokenNode {
                address: Some(relay_b_public),
                internal_address: Some(relay_b_internal),
                internal_group: 7,
                seller_id: 1,
                cipher: &ciphers[2],
            },
            TokenNode::endpoint(Some("200.0.0.1:50000".parse().unwrap()), &ciphers[3]),
        ];

        let mut output = vec![0u8; 4 * ENCRYPTED_ROUTE_TOKEN_BYTES];
        write_route_tokens(&mut output, 123, 42, 1, 0, 0, &nodes).unwrap();

        // Relay A forwards to relay B over the internal network.
        let cipher_a = TokenCipher::new(&keys.node_privates[1], &keys.backend_public).unwrap();
        let token_a = RouteToken::decrypt(
            &cipher_a,
            &output[ENCRYPTED_ROUTE_TOKEN_BYTES..][..ENCRYPTED_ROUTE_TOKEN_BYTES],
        )
        .unwrap();
        assert_eq!(token_a.next_address, Some(relay_b_internal));
        assert!(token_a.next_internal);
        assert!(token_a.next_same_group);
        assert!(!token_a.prev_internal);

        // And relay B hears from relay A on the internal network.
        let cipher_b = TokenCipher::new(&keys.node_privates[2], &keys.backend_public).unwrap();
        let token_b = RouteToken::decrypt(
            &cipher_b,
            &output[2 * ENCRYPTED_ROUTE_TOKEN_BYTES..][..ENCRYPTED_ROUTE_TOKEN_BYTES],
        )
        .unwrap();
        assert_eq!(token_b.prev_address, Some(relay_a_internal));
        assert!(token_b.prev_internal);
        // The server side of relay B is public.
        assert!(!token_b.next_internal);
    }

    #[test]
    fn continue_chain_round_trips() {
        let keys = keys(3);
        let ciphers: Vec<TokenCipher> = keys
            .node_publics
            .iter()
            .map(|public| TokenCipher::new(&keys.backend_private, public).unwrap())
            .collect();
        let cipher_refs: Vec<&TokenCipher> = ciphers.iter().collect();

        let mut output = vec![0u8; 3 * ENCRYPTED_CONTINUE_TOKEN_BYTES];
        let written = write_continue_tokens(&mut output, 99, 42, 2, &cipher_refs).unwrap();
        assert_eq!(written, 3 * ENCRYPTED_CONTINUE_TOKEN_BYTES);

        for (i, private) in keys.node_privates.iter().enumerate() {
            let node_cipher = TokenCipher::new(private, &keys.backend_public).unwrap();
            let record =
                &output[i * ENCRYPTED_CONTINUE_TOKEN_BYTES..][..ENCRYPTED_CONTINUE_TOKEN_BYTES];
            let token = ContinueToken::decrypt(&node_cipher, record).unwrap();
            assert_eq!(token.session_id, 42);
            assert_eq!(token.session_version, 2);
            assert_eq!(token.expire_timestamp, 99);
        }
    }

    #[test]
    fn buffer_too_small_is_an_error() {
        let keys = keys(1);
        let cipher = TokenCipher::new(&keys.backend_private, &keys.node_publics[0]).unwrap();
        let nodes = vec![TokenNode::endpoint(None, &cipher)];
        let mut output = vec![0u8; ENCRYPTED_ROUTE_TOKEN_BYTES - 1];
        assert!(matches!(
            write_route_tokens(&mut output, 0, 0, 0, 0, 0, &nodes).unwrap_err(),
            TokenError::BufferTooSmall { .. }
        ));
    }
}
