// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use crate::modules::error::RelayError;
use crate::modules::forward::session::RelaySmtpClient;

/// `bb8` connection manager for a single upstream host:port, sized to one
/// connection (`max_size(1)`) since the driver serialises writes per
/// upstream — see the design's §4.4 "Backpressure".
pub struct SmtpClientManager {
    pub host: String,
    pub port: u16,
    pub implicit_tls: bool,
}

impl bb8::ManageConnection for SmtpClientManager {
    type Connection = RelaySmtpClient;
    type Error = RelayError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        RelaySmtpClient::connect(&self.host, self.port, self.implicit_tls).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.noop().await
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
