//! SSL/TCP client socket over the modem's `AT+CCH*` service.

use std::time::Duration;

use a76xx_at::{AtChannel, HandlerId, NotificationHandler, UrcEvent};
use tracing::{debug, info};

use crate::error::ClientResult;
use crate::session::{SessionId, SslContextIndex};
use crate::ssl::{DataMode, SecureContext, SslCommands};

pub const URC_PEER_CLOSED: &str = "+CCH_PEER_CLOSED: ";

/// One socket session bound to an SSL context.
///
/// Received data is cached by the modem and pulled with [`read`](Self::read).
pub struct SecureSocket<'a> {
    channel: &'a mut dyn AtChannel,
    session: SessionId,
    secure: SecureContext,
    handler: Option<HandlerId>,
    connected: bool,
}

impl<'a> SecureSocket<'a> {
    pub fn new(
        channel: &'a mut dyn AtChannel,
        session: SessionId,
        ssl_context: SslContextIndex,
    ) -> ClientResult<Self> {
        let mut socket = SecureSocket {
            channel,
            session,
            secure: SecureContext::new(ssl_context),
            handler: None,
            connected: false,
        };
        let id = socket.channel.register(Box::new(NotificationHandler::new(
            URC_PEER_CLOSED,
            UrcEvent::SslPeerClosed,
        )))?;
        socket.handler = Some(id);
        Ok(socket)
    }

    fn commands(&mut self) -> SslCommands<'_> {
        SslCommands::new(&mut *self.channel)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Select cached receive in normal mode, start the service and bind the
    /// SSL context.
    pub fn begin(&mut self) -> ClientResult<()> {
        self.commands().set_report_mode(false, true)?;
        self.commands().set_data_mode(DataMode::Normal)?;
        self.commands().start()?;
        let (session, ctx) = (self.session, self.secure.index());
        self.commands().set_session_context(session, ctx)
    }

    pub fn connect(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let session = self.session;
        self.commands().open(session, host, port)?;
        self.connected = true;
        info!("Session {} connected to {}:{}", session, host, port);
        Ok(())
    }

    /// Whether [`connect`](Self::connect) succeeded and no close followed.
    ///
    /// A peer close is only seen as an [`UrcEvent::SslPeerClosed`] event.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn write(&mut self, data: &[u8]) -> ClientResult<()> {
        let session = self.session;
        self.commands().send(session, data)
    }

    /// Bytes waiting in the modem cache.
    pub fn available(&mut self) -> ClientResult<usize> {
        let session = self.session;
        self.commands().available(session)
    }

    /// Pull cached data into `buf`, returning the number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> ClientResult<usize> {
        let session = self.session;
        let read = self.commands().recv(session, buf)?;
        debug!("Read {} bytes from session {}", read, session);
        Ok(read)
    }

    pub fn disconnect(&mut self) -> ClientResult<()> {
        let session = self.session;
        self.connected = false;
        self.commands().close(session)
    }

    /// Stop the service.
    pub fn end(&mut self) -> ClientResult<()> {
        self.commands().stop()
    }

    /// Dispatch URCs for up to `timeout`.
    pub fn poll(&mut self, timeout: Duration) {
        self.channel.listen(timeout);
    }

    pub fn secure_context(&mut self) -> &mut SecureContext {
        &mut self.secure
    }

    /// Borrow the channel together with the SSL context, for provisioning.
    pub fn secure_parts(&mut self) -> (&mut SecureContext, &mut dyn AtChannel) {
        (&mut self.secure, &mut *self.channel)
    }

    pub fn channel(&mut self) -> &mut dyn AtChannel {
        &mut *self.channel
    }
}

impl Drop for SecureSocket<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.handler.take() {
            self.channel.deregister(id);
        }
    }
}
