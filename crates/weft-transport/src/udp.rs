//! UDP multicast socket
//!
//! Used for discovery announcements. The socket binds with address reuse so
//! several processes on one machine can share the announcement port, joins
//! the multicast group if one is given, and keeps multicast loopback on so
//! that processes on the same machine hear each other.

use bytes::Bytes;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{Result, TransportError};
use crate::pump::{next_channel_id, EventQueue};
use crate::traits::{ChannelId, DatagramHandler};

/// Largest datagram accepted by [`MulticastSocket::post_to`]
pub const MAX_DATAGRAM_SIZE: usize = u16::MAX as usize;

/// UDP socket bound to the announcement port
pub struct MulticastSocket {
    channel_id: ChannelId,
    local: SocketAddr,
    group: Option<IpAddr>,
    handler: Arc<dyn DatagramHandler>,
    queue: EventQueue,
    outbound: mpsc::UnboundedSender<(SocketAddr, Bytes)>,
    cancel: CancellationToken,
    closed: Mutex<bool>,
}

impl MulticastSocket {
    /// Bind to `local` and, if `group` is set, join it on the interface of
    /// `local` (the default interface when `local` is unspecified).
    pub fn open(
        local: SocketAddr,
        group: Option<IpAddr>,
        handler: Arc<dyn DatagramHandler>,
        queue: EventQueue,
    ) -> Result<Arc<Self>> {
        let socket = bind_socket(local, group)?;
        let socket = Arc::new(UdpSocket::from_std(socket.into())?);
        let bound = socket.local_addr()?;
        info!("UDP bound to {} (group {:?})", bound, group);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            channel_id: next_channel_id(),
            local: bound,
            group,
            handler,
            queue,
            outbound,
            cancel: CancellationToken::new(),
            closed: Mutex::new(false),
        });

        tokio::spawn(this.clone().read_loop(socket.clone()));
        tokio::spawn(write_loop(socket, outbound_rx, this.cancel.clone()));
        Ok(this)
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn group(&self) -> Option<IpAddr> {
        self.group
    }

    /// Queue a datagram for `destination`
    pub fn post_to(&self, destination: SocketAddr, data: Bytes) -> Result<()> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        if *self.closed.lock() {
            return Err(TransportError::NotConnected);
        }
        self.outbound
            .send((destination, data))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    pub fn close(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            *closed = true;
            self.cancel.cancel();
            debug!("UDP socket on {} closed", self.local);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn deliver(&self, from: SocketAddr, data: Bytes) {
        let handler = self.handler.clone();
        self.queue
            .push(move || handler.handle_datagram(from, data));
    }

    async fn read_loop(self: Arc<Self>, socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => received,
            };
            match received {
                Ok((len, from)) => {
                    self.deliver(from, Bytes::copy_from_slice(&buf[..len]));
                }
                Err(e) => {
                    error!("UDP receive error on {}: {}", self.local, e);
                    self.close();
                    break;
                }
            }
        }
    }
}

impl Drop for MulticastSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_loop(
    socket: Arc<UdpSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<(SocketAddr, Bytes)>,
    cancel: CancellationToken,
) {
    loop {
        let (destination, data) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound_rx.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        if let Err(e) = socket.send_to(&data, destination).await {
            error!("UDP send to {} failed: {}", destination, e);
        }
    }
}

fn bind_socket(local: SocketAddr, group: Option<IpAddr>) -> Result<std::net::UdpSocket> {
    let domain = match local {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&local.into())
        .map_err(|e| TransportError::BindFailed(format!("{}: {}", local, e)))?;

    match (group, local.ip()) {
        (Some(IpAddr::V4(group)), IpAddr::V4(interface)) => {
            socket
                .join_multicast_v4(&group, &interface)
                .map_err(|e| TransportError::Multicast(format!("join {}: {}", group, e)))?;
            socket.set_multicast_loop_v4(true)?;
        }
        (Some(IpAddr::V6(group)), IpAddr::V6(_)) => {
            // interface index 0 selects the default interface
            socket
                .join_multicast_v6(&group, 0)
                .map_err(|e| TransportError::Multicast(format!("join {}: {}", group, e)))?;
            socket.set_multicast_loop_v6(true)?;
        }
        (Some(group), interface) => {
            return Err(TransportError::Multicast(format!(
                "group {} does not match address family of {}",
                group, interface
            )));
        }
        (None, _) => {}
    }

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pump::EventPump;
    use std::time::Duration;

    #[derive(Default)]
    struct Datagrams(Mutex<Vec<(SocketAddr, Bytes)>>);

    impl DatagramHandler for Datagrams {
        fn handle_datagram(&self, from: SocketAddr, data: Bytes) -> anyhow::Result<()> {
            self.0.lock().push((from, data));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unicast_delivery_through_pump() {
        let mut pump = EventPump::new();
        let received = Arc::new(Datagrams::default());
        let ignored = Arc::new(Datagrams::default());

        let receiver = MulticastSocket::open(
            "127.0.0.1:0".parse().unwrap(),
            None,
            received.clone(),
            pump.queue(),
        )
        .unwrap();
        let sender = MulticastSocket::open(
            "127.0.0.1:0".parse().unwrap(),
            None,
            ignored.clone(),
            pump.queue(),
        )
        .unwrap();

        sender
            .post_to(receiver.local_addr(), Bytes::from_static(b"announce"))
            .unwrap();

        for _ in 0..50 {
            pump.drain(Duration::from_millis(20), Duration::from_millis(20))
                .await
                .unwrap();
            if !received.0.lock().is_empty() {
                break;
            }
        }
        let got = received.0.lock();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, sender.local_addr());
        assert_eq!(got[0].1, Bytes::from_static(b"announce"));
        assert!(ignored.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_datagram_size_guard() {
        let pump = EventPump::new();
        let socket = MulticastSocket::open(
            "127.0.0.1:0".parse().unwrap(),
            None,
            Arc::new(Datagrams::default()),
            pump.queue(),
        )
        .unwrap();

        let big = Bytes::from(vec![0u8; MAX_DATAGRAM_SIZE + 1]);
        assert!(matches!(
            socket.post_to(socket.local_addr(), big),
            Err(TransportError::MessageTooLarge { size: 65536, .. })
        ));

        socket.close();
        assert!(socket.is_closed());
        assert!(matches!(
            socket.post_to(socket.local_addr(), Bytes::from_static(b"x")),
            Err(TransportError::NotConnected)
        ));
    }
}
