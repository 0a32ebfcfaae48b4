//! ZMQ transport for the gateway sockets.
//!
//! Requests go over a REQ socket; pushes arrive on a SUB socket subscribed
//! to every topic. Multipart messages are joined into one frame.

use async_trait::async_trait;
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::application::ports::{
    Endpoint, GatewayConnector, PushChannel, RequestChannel, TransportError,
};

/// Opens ZMQ sockets to the gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZmqConnector;

impl ZmqConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn connect_error(endpoint: &Endpoint, e: &zeromq::ZmqError) -> TransportError {
    TransportError::Connect {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    }
}

fn join_frames(message: ZmqMessage) -> Vec<u8> {
    message.into_vec().concat()
}

#[async_trait]
impl GatewayConnector for ZmqConnector {
    async fn request(&self, endpoint: &Endpoint) -> Result<Box<dyn RequestChannel>, TransportError> {
        let mut socket = ReqSocket::new();
        socket
            .connect(&endpoint.to_string())
            .await
            .map_err(|e| connect_error(endpoint, &e))?;
        tracing::debug!(endpoint = %endpoint, "Request socket connected");
        Ok(Box::new(ZmqRequestChannel { socket }))
    }

    async fn subscribe(&self, endpoint: &Endpoint) -> Result<Box<dyn PushChannel>, TransportError> {
        let mut socket = SubSocket::new();
        socket
            .connect(&endpoint.to_string())
            .await
            .map_err(|e| connect_error(endpoint, &e))?;
        socket
            .subscribe("")
            .await
            .map_err(|e| connect_error(endpoint, &e))?;
        tracing::debug!(endpoint = %endpoint, "Push socket connected");
        Ok(Box::new(ZmqPushChannel { socket }))
    }
}

struct ZmqRequestChannel {
    socket: ReqSocket,
}

#[async_trait]
impl RequestChannel for ZmqRequestChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.socket
            .send(ZmqMessage::from(frame))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.socket
            .recv()
            .await
            .map(join_frames)
            .map_err(|e| TransportError::Recv(e.to_string()))
    }
}

struct ZmqPushChannel {
    socket: SubSocket,
}

#[async_trait]
impl PushChannel for ZmqPushChannel {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        self.socket
            .recv()
            .await
            .map(join_frames)
            .map_err(|e| TransportError::Recv(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeromq::RepSocket;

    #[test]
    fn multipart_messages_are_joined() {
        let mut message = ZmqMessage::from(b"TC.F.TWF.FITX:".to_vec());
        message.push_back(br#"{"DataType":"PING"}"#.to_vec().into());

        assert_eq!(join_frames(message), br#"TC.F.TWF.FITX:{"DataType":"PING"}"#.to_vec());
    }

    #[tokio::test]
    async fn request_round_trip() {
        let mut rep = RepSocket::new();
        let zeromq::Endpoint::Tcp(_, port) = rep.bind("tcp://127.0.0.1:0").await.unwrap() else {
            panic!("expected a TCP endpoint");
        };

        let server = tokio::spawn(async move {
            let request = rep.recv().await.unwrap();
            assert_eq!(join_frames(request), b"{\"Request\":\"PONG\"}".to_vec());
            rep.send(ZmqMessage::from(b"{\"Reply\":\"PONG\"}\0".to_vec()))
                .await
                .unwrap();
        });

        let mut channel = ZmqConnector::new()
            .request(&Endpoint::new("127.0.0.1", port))
            .await
            .unwrap();
        channel.send(b"{\"Request\":\"PONG\"}".to_vec()).await.unwrap();

        assert_eq!(channel.recv().await.unwrap(), b"{\"Reply\":\"PONG\"}\0".to_vec());
        server.await.unwrap();
    }
}
