//! Connection phase: plain protocol-10 handshake

use protocol::{
    CIPHER_SIZE, COLLATION_UTF8_GENERAL, CapabilityFlags, PacketStream, SERVER_CAPABILITIES,
    error::Result,
    packets::{HandshakeResponse41, InitialHandshake, OkPacket},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

/// Run the handshake to completion.
///
/// Sends the initial handshake, decodes the client's response against the
/// server capability set and acknowledges with OK. Any credentials are accepted.
pub async fn perform<S>(
    stream: &mut PacketStream<S>,
    connection_id: u32,
    cipher: &[u8; CIPHER_SIZE],
) -> Result<HandshakeResponse41>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.reset_sequence();

    let greeting = InitialHandshake::new(connection_id, *cipher, SERVER_CAPABILITIES);
    stream.write_packet(&greeting.to_bytes()).await?;

    let payload = stream.read_packet().await?;
    let response = HandshakeResponse41::from_bytes(payload, SERVER_CAPABILITIES)?;

    debug!(
        capabilities = response.capabilities.bits(),
        "Client capabilities: {:?}",
        response.capabilities.names()
    );
    debug!(
        max_packet_size = response.max_packet_size,
        charset = response.charset,
        username = %response.username,
        schema = response.schema.as_deref().unwrap_or(""),
        auth_response_len = response.auth_response.len(),
        "Handshake response"
    );
    if response.charset != COLLATION_UTF8_GENERAL {
        warn!(
            "Client charset {:#04x} differs from server charset {:#04x}",
            response.charset, COLLATION_UTF8_GENERAL
        );
    }
    if !response.capabilities.contains(CapabilityFlags::SECURE_CONNECTION) {
        debug!("Client did not request secure connection authentication");
    }

    stream.write_packet(&OkPacket.to_bytes()).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ProtocolError, packets::generate_cipher};
    use tokio::io::duplex;

    fn response_bytes(capabilities: CapabilityFlags) -> Vec<u8> {
        HandshakeResponse41 {
            capabilities,
            max_packet_size: 0,
            charset: COLLATION_UTF8_GENERAL,
            username: "root".to_string(),
            auth_response: vec![1; 20],
            schema: None,
        }
        .to_bytes()
    }

    #[tokio::test]
    async fn test_handshake_sequence_numbers() {
        let (client, server) = duplex(4096);
        let cipher = generate_cipher();

        let server_task = tokio::spawn(async move {
            let mut stream = PacketStream::new(server);
            perform(&mut stream, 42, &cipher).await
        });

        let mut client = PacketStream::new(client);
        let greeting = InitialHandshake::from_bytes(client.read_packet().await.unwrap()).unwrap();
        assert_eq!(greeting.connection_id, 42);
        assert_eq!(greeting.cipher, cipher);
        assert_eq!(client.sequence(), 1);

        client
            .write_packet(&response_bytes(
                CapabilityFlags::PROTOCOL_41 | CapabilityFlags::SECURE_CONNECTION,
            ))
            .await
            .unwrap();

        assert_eq!(client.read_packet().await.unwrap(), &OkPacket.to_bytes()[..]);
        assert_eq!(client.sequence(), 3);

        let response = server_task.await.unwrap().unwrap();
        assert_eq!(response.username, "root");
        assert_eq!(response.max_packet_size, 0xFF_FFFF);
        assert_eq!(response.schema, None);
    }

    #[tokio::test]
    async fn test_handshake_rejects_pre_41_client() {
        let (client, server) = duplex(4096);
        let cipher = generate_cipher();

        let server_task = tokio::spawn(async move {
            let mut stream = PacketStream::new(server);
            perform(&mut stream, 1, &cipher).await
        });

        let mut client = PacketStream::new(client);
        client.read_packet().await.unwrap();
        client
            .write_packet(&response_bytes(CapabilityFlags::LONG_PASSWORD))
            .await
            .unwrap();

        assert!(matches!(
            server_task.await.unwrap(),
            Err(ProtocolError::NotProtocol41 { .. })
        ));
    }

    #[tokio::test]
    async fn test_handshake_rejects_wrong_sequence() {
        let (client, server) = duplex(4096);
        let cipher = generate_cipher();

        let server_task = tokio::spawn(async move {
            let mut stream = PacketStream::new(server);
            perform(&mut stream, 1, &cipher).await
        });

        let mut client = PacketStream::new(client);
        client.read_packet().await.unwrap();
        // Restarting at zero instead of continuing the exchange at 1
        client.reset_sequence();
        client
            .write_packet(&response_bytes(CapabilityFlags::PROTOCOL_41))
            .await
            .unwrap();

        assert!(matches!(
            server_task.await.unwrap(),
            Err(ProtocolError::SequenceMismatch { expected: 1, actual: 0 })
        ));
    }
}
